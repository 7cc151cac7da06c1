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

use std::fmt;

use crate::queue::BoundedQueue;
use crate::superpage::Superpage;

/// Hardware address of a DMA link within a card channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One DMA sub-channel: the superpages handed to the firmware for this link
/// and a shadow of the firmware's completion counter.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    /// Superpages pushed to the firmware and not yet seen complete, oldest first
    pub(crate) queue: BoundedQueue<Superpage>,
    /// Number of superpages the driver has moved to the ready queue this
    /// session. Mirrors the firmware's per-link superpage counter and wraps
    /// the same way the 32-bit register does.
    pub(crate) superpage_counter: u32,
}

impl Link {
    pub(crate) fn new(id: LinkId, capacity: usize) -> Self {
        Self {
            id,
            queue: BoundedQueue::new(capacity),
            superpage_counter: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Number of superpages outstanding on the link
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn superpage_counter(&self) -> u32 {
        self.superpage_counter
    }

    /// Forget every pending superpage and restart the counter, as the
    /// firmware does on a card reset.
    pub(crate) fn reset(&mut self) {
        self.queue.clear();
        self.superpage_counter = 0;
    }

    /// How many superpages the firmware reports beyond what the driver has
    /// already collected.
    #[inline]
    pub(crate) fn arrivals_since(&self, hardware_count: u32) -> u32 {
        hardware_count.wrapping_sub(self.superpage_counter)
    }
}
