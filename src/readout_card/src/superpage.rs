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

//! Superpage descriptors.
//!
//! A superpage is a contiguous slice of the channel's DMA buffer, described
//! by its byte offset and length. It is the unit the firmware fills and the
//! unit the driver tracks completion for:
//!
//! ```text
//!     producer ──push──> link queue ──fill──> ready queue ──pop──> consumer
//!                        (pending)            (received == size)
//! ```
//!
//! The descriptor is moved, never shared, between queues.

/// A descriptor of a region of the DMA buffer handed to the card.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Superpage {
    offset: usize,
    size: usize,
    received: usize,
    ready: bool,
    user_data: usize,
}

impl Superpage {
    /// Create a superpage covering `size` bytes at `offset` in the DMA buffer.
    pub fn new(offset: usize, size: usize) -> Self {
        Self {
            offset,
            size,
            received: 0,
            ready: false,
            user_data: 0,
        }
    }

    /// Attach an opaque value the producer wants back when the superpage is
    /// popped. The engine never looks at it.
    pub fn with_user_data(mut self, user_data: usize) -> Self {
        self.user_data = user_data;
        self
    }

    /// Byte offset of the superpage in the DMA buffer
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Size of the superpage in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of bytes the card has written into the superpage
    #[inline]
    pub fn received(&self) -> usize {
        self.received
    }

    /// Has the card confirmed the superpage as complete?
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    #[inline]
    pub fn user_data(&self) -> usize {
        self.user_data
    }

    /// Marks the superpage complete. `received` always equals `size` once
    /// ready is set.
    #[inline]
    pub(crate) fn mark_ready(&mut self) {
        self.received = self.size;
        self.ready = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_superpage_is_empty_and_not_ready() {
        let sp = Superpage::new(0x10_0000, 0x10_0000).with_user_data(42);
        assert_eq!(sp.offset(), 0x10_0000);
        assert_eq!(sp.size(), 0x10_0000);
        assert_eq!(sp.received(), 0);
        assert!(!sp.is_ready());
        assert_eq!(sp.user_data(), 42);
    }

    #[test]
    fn mark_ready_fills_received() {
        let mut sp = Superpage::new(0, 8192);
        sp.mark_ready();
        assert!(sp.is_ready());
        assert_eq!(sp.received(), sp.size());
    }
}
