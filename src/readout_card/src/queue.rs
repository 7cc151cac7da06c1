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

//! Fixed-capacity FIFO used for the per-link transfer queues and the
//! channel-wide ready queue.
//!
//! The storage is allocated once when the queue is created; pushing and
//! popping only move the head index and the length, so the push/fill hot path
//! never allocates.
//!
//! ```text
//!          head             head + len
//!           v                  v
//!   ┌─────┬─────┬─────┬─────┬─────┬─────┐
//!   │     │  A  │  B  │  C  │     │     │   capacity = 6, len = 3
//!   └─────┴─────┴─────┴─────┴─────┴─────┘
//! ```
//!
//! Indices wrap modulo the capacity.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError<T> {
    /// The queue is at capacity; the rejected item is handed back
    #[error("Queue is full")]
    Full(T),
    #[error("Queue is empty")]
    Empty,
}

/// A fixed-capacity double-ended ring of `T`.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Physical slot of the item `n` positions after the head
    #[inline]
    fn slot(&self, n: usize) -> usize {
        (self.head + n) % self.slots.len()
    }

    /// Append an item at the back.
    pub fn push_back(&mut self, item: T) -> Result<(), QueueError<T>> {
        if self.is_full() {
            return Err(QueueError::Full(item));
        }

        let tail = self.slot(self.len);
        debug_assert!(self.slots[tail].is_none());
        self.slots[tail] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Remove and return the oldest item.
    pub fn pop_front(&mut self) -> Result<T, QueueError<T>> {
        if self.is_empty() {
            return Err(QueueError::Empty);
        }

        let item = self.slots[self.head].take().ok_or(QueueError::Empty)?;
        self.head = self.slot(1);
        self.len -= 1;
        Ok(item)
    }

    /// Oldest item, if any
    pub fn front(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// Drop every item and rewind to the first slot.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |n| self.slots[self.slot(n)].as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_across_wraparound() {
        let mut q = BoundedQueue::new(3);
        for round in 0..5 {
            q.push_back(round * 10).unwrap();
            q.push_back(round * 10 + 1).unwrap();
            assert_eq!(q.pop_front().unwrap(), round * 10);
            assert_eq!(q.pop_front().unwrap(), round * 10 + 1);
        }
        assert!(q.is_empty());
    }

    #[test]
    fn push_on_full_hands_item_back() {
        let mut q = BoundedQueue::new(2);
        q.push_back("a").unwrap();
        q.push_back("b").unwrap();
        assert!(q.is_full());
        assert_eq!(q.push_back("c"), Err(QueueError::Full("c")));
        assert_eq!(q.len(), 2);
        assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn pop_on_empty_fails() {
        let mut q: BoundedQueue<u32> = BoundedQueue::new(4);
        assert_eq!(q.pop_front(), Err(QueueError::Empty));
        assert!(q.front().is_none());
    }

    #[test]
    fn zero_capacity_is_always_full() {
        let mut q = BoundedQueue::new(0);
        assert!(q.is_full());
        assert!(q.is_empty());
        assert_eq!(q.push_back(1), Err(QueueError::Full(1)));
    }

    #[test]
    fn front_and_clear() {
        let mut q = BoundedQueue::new(4);
        q.push_back(1).unwrap();
        q.push_back(2).unwrap();
        q.pop_front().unwrap();
        q.push_back(3).unwrap();
        assert_eq!(q.front(), Some(&2));
        assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec![2, 3]);

        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.capacity(), 4);
        q.push_back(9).unwrap();
        assert_eq!(q.front(), Some(&9));
    }
}

#[cfg(test)]
mod fuzz {
    use std::collections::VecDeque;

    use quickcheck::{Arbitrary, Gen, QuickCheck};

    use super::*;

    const MAX_CAPACITY: usize = 16;
    const MAX_OPS: usize = 128;

    #[derive(Clone, Debug)]
    enum Op {
        Push(u32),
        Pop,
        Clear,
    }

    impl Arbitrary for Op {
        fn arbitrary(g: &mut Gen) -> Self {
            match u8::arbitrary(g) % 8 {
                0..=3 => Op::Push(u32::arbitrary(g)),
                4..=6 => Op::Pop,
                7 => Op::Clear,
                _ => unreachable!(),
            }
        }
    }

    #[derive(Clone, Debug)]
    struct Scenario {
        capacity: usize,
        ops: Vec<Op>,
    }

    impl Arbitrary for Scenario {
        fn arbitrary(g: &mut Gen) -> Self {
            let capacity = usize::arbitrary(g) % MAX_CAPACITY + 1;
            let num_ops = usize::arbitrary(g) % MAX_OPS + 1;
            let ops = (0..num_ops).map(|_| Op::arbitrary(g)).collect();
            Scenario { capacity, ops }
        }
    }

    fn run_scenario(s: Scenario) -> bool {
        let mut queue = BoundedQueue::new(s.capacity);
        let mut model = VecDeque::new();

        for op in &s.ops {
            match op {
                Op::Push(v) => {
                    let res = queue.push_back(*v);
                    if model.len() == s.capacity {
                        if res != Err(QueueError::Full(*v)) {
                            return false;
                        }
                    } else {
                        if res.is_err() {
                            return false;
                        }
                        model.push_back(*v);
                    }
                }
                Op::Pop => match (queue.pop_front(), model.pop_front()) {
                    (Ok(a), Some(b)) if a == b => {}
                    (Err(QueueError::Empty), None) => {}
                    _ => return false,
                },
                Op::Clear => {
                    queue.clear();
                    model.clear();
                }
            }

            if queue.len() != model.len() || queue.front() != model.front() {
                return false;
            }
            if !queue.iter().eq(model.iter()) {
                return false;
            }
        }

        true
    }

    #[test]
    fn prop_matches_vecdeque_model() {
        #[cfg(miri)]
        let tests = 1;
        #[cfg(not(miri))]
        let tests = 200;

        QuickCheck::new()
            .tests(tests)
            .quickcheck(run_scenario as fn(Scenario) -> bool);
    }
}
