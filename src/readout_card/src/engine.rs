/*
Copyright 2026 The Readout Card Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! The channel queue engine.
//!
//! Superpages are distributed over the enabled links, each link keeping its
//! own FIFO of superpages the firmware still owns. Completions are detected by
//! comparing the firmware's per-link superpage counter against a shadow
//! counter, and completed superpages move to a single ready queue shared by
//! all links.
//!
//! ```text
//!               ┌── link 0: [sp0, sp3]  ──┐
//!   push ──>────┼── link 1: [sp1, sp4]  ──┼──fill──> ready: [..] ──pop──>
//!               └── link 2: [sp2]       ──┘
//! ```
//!
//! `transfer_slots_available` is maintained on every push and every move to
//! the ready queue and always equals
//! `link_capacity * links - sum(pending)`, which
//! [`QueueEngine::recompute_transfer_slots`] checks by scanning.

use tracing::{error, warn};

use crate::error::ReadoutError;
use crate::link::{Link, LinkId};
use crate::metrics::{CounterMetric, EmittableMetric};
use crate::queue::{BoundedQueue, QueueError};
use crate::superpage::Superpage;
use crate::Result;

#[derive(Debug)]
pub(crate) struct QueueEngine {
    links: Vec<Link>,
    ready: BoundedQueue<Superpage>,
    link_capacity: usize,
    transfer_slots_available: usize,
    /// Firmware counters read at the start of a poll, one per link
    hardware_counts: Vec<u32>,
}

impl QueueEngine {
    pub(crate) fn new(link_ids: &[LinkId], link_capacity: usize, ready_capacity: usize) -> Self {
        let links = link_ids
            .iter()
            .map(|&id| Link::new(id, link_capacity))
            .collect::<Vec<_>>();
        Self {
            transfer_slots_available: link_capacity * links.len(),
            hardware_counts: vec![0; links.len()],
            links,
            ready: BoundedQueue::new(ready_capacity),
            link_capacity,
        }
    }

    pub(crate) fn links(&self) -> &[Link] {
        &self.links
    }

    pub(crate) fn transfer_slots_available(&self) -> usize {
        self.transfer_slots_available
    }

    pub(crate) fn transfer_queue_capacity(&self) -> usize {
        self.link_capacity * self.links.len()
    }

    pub(crate) fn is_transfer_queue_empty(&self) -> bool {
        self.transfer_slots_available == self.transfer_queue_capacity()
    }

    pub(crate) fn ready_queue_size(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn ready_queue_capacity(&self) -> usize {
        self.ready.capacity()
    }

    pub(crate) fn is_ready_queue_full(&self) -> bool {
        self.ready.is_full()
    }

    /// Transfer slots by scanning every link
    pub(crate) fn recompute_transfer_slots(&self) -> usize {
        let pending: usize = self.links.iter().map(Link::pending).sum();
        self.transfer_queue_capacity() - pending
    }

    /// Forget all superpages and restore full capacity
    pub(crate) fn reset(&mut self) {
        for link in self.links.iter_mut() {
            link.reset();
        }
        self.ready.clear();
        self.transfer_slots_available = self.transfer_queue_capacity();
    }

    /// Index of the link with the fewest pending superpages, lowest index
    /// on ties.
    fn least_loaded_link(&self) -> Option<usize> {
        self.links
            .iter()
            .enumerate()
            .min_by_key(|(_, link)| link.pending())
            .map(|(index, _)| index)
    }

    /// Fails with `QueueFull` when no transfer slot is left
    pub(crate) fn check_capacity(&self) -> Result<()> {
        if self.transfer_slots_available == 0 {
            return Err(ReadoutError::QueueFull);
        }
        Ok(())
    }

    /// Assigns `superpage` to the least-loaded link, lets `submit` hand it to
    /// the firmware, and only then queues it. Nothing changes when `submit`
    /// fails.
    pub(crate) fn push<F>(&mut self, superpage: Superpage, submit: F) -> Result<LinkId>
    where
        F: FnOnce(LinkId) -> anyhow::Result<()>,
    {
        self.check_capacity()?;

        let index = self.least_loaded_link().ok_or(ReadoutError::QueueFull)?;
        let link = &mut self.links[index];
        if link.queue.is_full() {
            return Err(ReadoutError::LinkQueueFull {
                link: link.id(),
                capacity: link.queue.capacity(),
            });
        }

        let id = link.id();
        submit(id)?;

        link.queue
            .push_back(superpage)
            .map_err(|_| ReadoutError::LinkQueueFull {
                link: id,
                capacity: self.link_capacity,
            })?;
        self.transfer_slots_available -= 1;

        CounterMetric::SuperpagesPushed { link: id }.emit();
        Ok(id)
    }

    /// One poll pass: read every link's firmware counter, then move newly
    /// completed superpages to the ready queue until it is full. Returns the
    /// number of superpages moved.
    ///
    /// All counters are checked before anything is moved, so a protocol
    /// violation on any link leaves every queue untouched.
    pub(crate) fn fill<F>(&mut self, mut read_count: F) -> Result<usize>
    where
        F: FnMut(LinkId) -> anyhow::Result<u32>,
    {
        for (link, count) in self.links.iter().zip(self.hardware_counts.iter_mut()) {
            *count = read_count(link.id())?;
            let arrived = link.arrivals_since(*count);
            if arrived as usize > link.pending() {
                error!(
                    link = %link.id(),
                    hardware_count = *count,
                    driver_count = link.superpage_counter(),
                    pending = link.pending(),
                    "Firmware reported more superpages available ({}) than present in the link queue ({})",
                    arrived,
                    link.pending()
                );
                CounterMetric::ProtocolViolations { link: link.id() }.emit();
                return Err(ReadoutError::ProtocolViolation {
                    link: link.id(),
                    hardware_count: *count,
                    driver_count: link.superpage_counter(),
                    pending: link.pending(),
                });
            }
        }

        let mut moved = 0;
        for index in 0..self.links.len() {
            if self.ready.is_full() {
                break;
            }
            let arrived = self.links[index].arrivals_since(self.hardware_counts[index]) as usize;
            moved += self.move_to_ready(index, arrived)?;
        }
        Ok(moved)
    }

    /// Final pass after the card stopped writing: move what the firmware
    /// reports plus one superpage that may have been in flight, then verify
    /// that no link kept anything.
    pub(crate) fn drain<F>(&mut self, mut read_count: F) -> Result<usize>
    where
        F: FnMut(LinkId) -> anyhow::Result<u32>,
    {
        let mut moved = 0;
        for index in 0..self.links.len() {
            let link = &self.links[index];
            let count = read_count(link.id())?;
            let arrived = link.arrivals_since(count) as usize;
            if arrived > link.pending() {
                warn!(
                    link = %link.id(),
                    arrived,
                    pending = link.pending(),
                    "Firmware reported more superpages than pending while draining"
                );
            }
            moved += self.move_to_ready(index, arrived.saturating_add(1))?;
        }

        let capacity = self.transfer_queue_capacity();
        for link in &self.links {
            if link.pending() != 0 || self.transfer_slots_available != capacity {
                return Err(ReadoutError::DrainIncomplete {
                    link: link.id(),
                    remaining: link.pending(),
                    slots_available: self.transfer_slots_available,
                    capacity,
                });
            }
        }
        Ok(moved)
    }

    /// Moves up to `count` of the oldest superpages of link `index` to the
    /// ready queue, stopping when either runs out.
    fn move_to_ready(&mut self, index: usize, count: usize) -> Result<usize> {
        let link = &mut self.links[index];
        let mut moved = 0;

        while moved < count && !link.queue.is_empty() && !self.ready.is_full() {
            let mut superpage = link.queue.pop_front().map_err(|_| ReadoutError::QueueEmpty)?;
            superpage.mark_ready();
            self.ready
                .push_back(superpage)
                .map_err(|_| crate::new_error!("ready queue overflowed"))?;
            link.superpage_counter = link.superpage_counter.wrapping_add(1);
            self.transfer_slots_available += 1;
            moved += 1;
        }

        if moved > 0 {
            CounterMetric::SuperpagesReady {
                link: link.id(),
                count: moved as u64,
            }
            .emit();
        }
        Ok(moved)
    }

    pub(crate) fn peek(&self) -> Result<&Superpage> {
        self.ready.front().ok_or(ReadoutError::QueueEmpty)
    }

    pub(crate) fn pop(&mut self) -> Result<Superpage> {
        self.ready.pop_front().map_err(|e| match e {
            QueueError::Empty | QueueError::Full(_) => ReadoutError::QueueEmpty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(n: u32) -> Vec<LinkId> {
        (0..n).map(LinkId).collect()
    }

    fn push_n(engine: &mut QueueEngine, n: usize) -> Vec<LinkId> {
        (0..n)
            .map(|i| {
                engine
                    .push(Superpage::new(i * 8192, 8192).with_user_data(i), |_| Ok(()))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn pushes_spread_evenly_over_links() {
        let mut engine = QueueEngine::new(&links(3), 4, 12);
        let assigned = push_n(&mut engine, 9);
        assert_eq!(
            assigned,
            [0, 1, 2, 0, 1, 2, 0, 1, 2].map(LinkId).to_vec()
        );
        for link in engine.links() {
            assert_eq!(link.pending(), 3);
        }
        assert_eq!(engine.transfer_slots_available(), 3);
        assert_eq!(engine.recompute_transfer_slots(), 3);
    }

    #[test]
    fn full_transfer_queue_rejects_without_mutation() {
        let mut engine = QueueEngine::new(&links(2), 4, 8);
        push_n(&mut engine, 8);

        let mut submitted = false;
        let res = engine.push(Superpage::new(0, 8192), |_| {
            submitted = true;
            Ok(())
        });
        assert!(matches!(res, Err(ReadoutError::QueueFull)));
        assert!(!submitted);
        assert_eq!(engine.transfer_slots_available(), 0);
        assert_eq!(engine.recompute_transfer_slots(), 0);
    }

    #[test]
    fn failed_submit_leaves_queues_untouched() {
        let mut engine = QueueEngine::new(&links(2), 4, 8);
        let res = engine.push(Superpage::new(0, 8192), |_| {
            Err(anyhow::anyhow!("descriptor FIFO write failed"))
        });
        assert!(matches!(res, Err(ReadoutError::Hardware(_))));
        assert!(engine.is_transfer_queue_empty());
        assert_eq!(engine.links()[0].pending(), 0);
    }

    #[test]
    fn one_arrival_frees_one_slot() {
        let mut engine = QueueEngine::new(&links(2), 4, 8);
        push_n(&mut engine, 8);

        let moved = engine
            .fill(|link| Ok(if link == LinkId(0) { 1 } else { 0 }))
            .unwrap();
        assert_eq!(moved, 1);
        assert_eq!(engine.ready_queue_size(), 1);
        assert_eq!(engine.transfer_slots_available(), 1);
        assert_eq!(engine.links()[0].superpage_counter(), 1);

        let sp = engine.pop().unwrap();
        assert!(sp.is_ready());
        assert_eq!(sp.received(), sp.size());
        assert_eq!(sp.user_data(), 0);

        assert_eq!(
            engine.push(Superpage::new(0, 8192), |_| Ok(())).unwrap(),
            LinkId(0)
        );
    }

    #[test]
    fn fill_without_new_arrivals_changes_nothing() {
        let mut engine = QueueEngine::new(&links(2), 4, 8);
        push_n(&mut engine, 4);
        engine.fill(|_| Ok(1)).unwrap();

        let slots = engine.transfer_slots_available();
        let ready = engine.ready_queue_size();
        assert_eq!(engine.fill(|_| Ok(1)).unwrap(), 0);
        assert_eq!(engine.transfer_slots_available(), slots);
        assert_eq!(engine.ready_queue_size(), ready);
    }

    #[test]
    fn over_reporting_is_a_protocol_violation() {
        let mut engine = QueueEngine::new(&links(2), 4, 8);
        push_n(&mut engine, 4);

        // link 0 is fine, link 1 claims three completions with two pending
        let err = engine
            .fill(|link| Ok(if link == LinkId(0) { 2 } else { 3 }))
            .unwrap_err();
        match err {
            ReadoutError::ProtocolViolation {
                link,
                hardware_count,
                driver_count,
                pending,
            } => {
                assert_eq!(link, LinkId(1));
                assert_eq!(hardware_count, 3);
                assert_eq!(driver_count, 0);
                assert_eq!(pending, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(nothing_moved(&engine));
    }

    fn nothing_moved(engine: &QueueEngine) -> bool {
        engine.ready_queue_size() == 0
            && engine.links().iter().all(|l| l.pending() == 2)
            && engine.transfer_slots_available() == 4
    }

    #[test]
    fn fill_stops_when_ready_queue_is_full() {
        let mut engine = QueueEngine::new(&links(2), 4, 3);
        push_n(&mut engine, 6);

        assert_eq!(engine.fill(|_| Ok(3)).unwrap(), 3);
        assert!(engine.is_ready_queue_full());
        assert_eq!(engine.links()[0].pending(), 0);
        assert_eq!(engine.links()[1].pending(), 3);

        engine.pop().unwrap();
        engine.pop().unwrap();
        assert_eq!(engine.fill(|_| Ok(3)).unwrap(), 2);
        assert_eq!(engine.links()[1].pending(), 1);
        assert_eq!(engine.transfer_slots_available(), engine.recompute_transfer_slots());
    }

    #[test]
    fn drain_takes_reported_plus_one() {
        let mut engine = QueueEngine::new(&links(1), 4, 4);
        push_n(&mut engine, 2);
        assert_eq!(engine.drain(|_| Ok(2)).unwrap(), 2);
        assert!(engine.is_transfer_queue_empty());
        assert_eq!(engine.ready_queue_size(), 2);

        let mut engine = QueueEngine::new(&links(1), 4, 4);
        push_n(&mut engine, 2);
        // the second superpage was still being written
        assert_eq!(engine.drain(|_| Ok(1)).unwrap(), 2);
        assert!(engine.is_transfer_queue_empty());
    }

    #[test]
    fn drain_reports_leftovers() {
        let mut engine = QueueEngine::new(&links(2), 4, 8);
        push_n(&mut engine, 6);
        let err = engine.drain(|_| Ok(0)).unwrap_err();
        assert!(matches!(
            err,
            ReadoutError::DrainIncomplete {
                link: LinkId(0),
                remaining: 2,
                slots_available: 4,
                capacity: 8,
            }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn reset_restores_capacity() {
        let mut engine = QueueEngine::new(&links(2), 4, 8);
        push_n(&mut engine, 5);
        engine.fill(|_| Ok(1)).unwrap();
        engine.reset();
        assert!(engine.is_transfer_queue_empty());
        assert_eq!(engine.ready_queue_size(), 0);
        assert!(engine.links().iter().all(|l| l.superpage_counter() == 0));
        assert!(matches!(engine.pop(), Err(ReadoutError::QueueEmpty)));
        assert!(matches!(engine.peek(), Err(ReadoutError::QueueEmpty)));
    }
}
