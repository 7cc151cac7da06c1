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

//! Seams between the channel and the card.
//!
//! The channel never touches memory-mapped registers directly. Everything it
//! needs from the firmware goes through [`CardRegisters`], and everything it
//! needs from the DMA buffer goes through [`BufferProvider`]. A PCIe backend
//! implements both over BAR accesses and a pinned buffer; [`crate::dummy`]
//! implements them in memory.

use crate::link::LinkId;
use crate::parameters::{DataSource, GeneratorPattern};

/// Register-level operations on one DMA channel of a card.
///
/// Every method can fail; failures are surfaced to the caller of the channel
/// operation as [`crate::ReadoutError::Hardware`].
pub trait CardRegisters {
    /// Hand a superpage descriptor to the firmware FIFO of `link`.
    /// `pages` is the superpage size in DMA pages, `bus_address` is where
    /// the card writes.
    fn push_superpage_descriptor(
        &mut self,
        link: LinkId,
        pages: u32,
        bus_address: u64,
    ) -> anyhow::Result<()>;

    /// Free-running count of superpages the firmware has completed on
    /// `link` since the last card reset. Wraps at 2^32.
    fn superpage_count(&mut self, link: LinkId) -> anyhow::Result<u32>;

    fn set_data_source(&mut self, source: DataSource) -> anyhow::Result<()>;

    fn set_data_generator_pattern(
        &mut self,
        pattern: GeneratorPattern,
        size: usize,
        random_size: bool,
    ) -> anyhow::Result<()>;

    /// Arm (or disarm) the DMA buffer. Armed, the card may write into it.
    fn set_buffer_ready(&mut self, ready: bool) -> anyhow::Result<()>;

    fn reset_data_generator_counter(&mut self) -> anyhow::Result<()>;

    /// Card-internal reset. Clears the firmware FIFOs and the completion
    /// counters.
    fn reset_card(&mut self) -> anyhow::Result<()>;

    /// Reset the DIU (and the SIU when `include_siu`) of the optical link.
    /// Cards without external endpoints accept and ignore it.
    fn reset_external(&mut self, include_siu: bool) -> anyhow::Result<()> {
        let _ = include_siu;
        Ok(())
    }

    fn set_debug_mode(&mut self, enabled: bool) -> anyhow::Result<()>;

    fn debug_mode(&mut self) -> anyhow::Result<bool>;

    fn enable_data_taking(&mut self) -> anyhow::Result<()>;

    fn disable_data_taking(&mut self) -> anyhow::Result<()>;

    /// Packets the firmware dropped because no superpage was available
    fn dropped_packets(&mut self) -> anyhow::Result<u32>;

    /// Ask the data generator to corrupt its next word
    fn inject_generator_error(&mut self) -> anyhow::Result<()>;
}

/// Access to the channel's DMA buffer.
pub trait BufferProvider {
    /// Size of the buffer in bytes
    fn size(&self) -> usize;

    /// Bus address the card has to use to write at `offset` into the buffer
    fn bus_address(&self, offset: usize) -> anyhow::Result<u64>;
}

/// Forwards both façades through a pointer type, so a channel can own a
/// boxed backend or borrow one the caller keeps inspecting.
macro_rules! forward_through {
    ($($ptr:ty),+) => {
        $(
            impl<T: CardRegisters + ?Sized> CardRegisters for $ptr {
                fn push_superpage_descriptor(
                    &mut self,
                    link: LinkId,
                    pages: u32,
                    bus_address: u64,
                ) -> anyhow::Result<()> {
                    (**self).push_superpage_descriptor(link, pages, bus_address)
                }

                fn superpage_count(&mut self, link: LinkId) -> anyhow::Result<u32> {
                    (**self).superpage_count(link)
                }

                fn set_data_source(&mut self, source: DataSource) -> anyhow::Result<()> {
                    (**self).set_data_source(source)
                }

                fn set_data_generator_pattern(
                    &mut self,
                    pattern: GeneratorPattern,
                    size: usize,
                    random_size: bool,
                ) -> anyhow::Result<()> {
                    (**self).set_data_generator_pattern(pattern, size, random_size)
                }

                fn set_buffer_ready(&mut self, ready: bool) -> anyhow::Result<()> {
                    (**self).set_buffer_ready(ready)
                }

                fn reset_data_generator_counter(&mut self) -> anyhow::Result<()> {
                    (**self).reset_data_generator_counter()
                }

                fn reset_card(&mut self) -> anyhow::Result<()> {
                    (**self).reset_card()
                }

                fn reset_external(&mut self, include_siu: bool) -> anyhow::Result<()> {
                    (**self).reset_external(include_siu)
                }

                fn set_debug_mode(&mut self, enabled: bool) -> anyhow::Result<()> {
                    (**self).set_debug_mode(enabled)
                }

                fn debug_mode(&mut self) -> anyhow::Result<bool> {
                    (**self).debug_mode()
                }

                fn enable_data_taking(&mut self) -> anyhow::Result<()> {
                    (**self).enable_data_taking()
                }

                fn disable_data_taking(&mut self) -> anyhow::Result<()> {
                    (**self).disable_data_taking()
                }

                fn dropped_packets(&mut self) -> anyhow::Result<u32> {
                    (**self).dropped_packets()
                }

                fn inject_generator_error(&mut self) -> anyhow::Result<()> {
                    (**self).inject_generator_error()
                }
            }
        )+
    };
}

forward_through!(Box<T>, &mut T);

impl<T: BufferProvider + ?Sized> BufferProvider for Box<T> {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn bus_address(&self, offset: usize) -> anyhow::Result<u64> {
        (**self).bus_address(offset)
    }
}

impl<T: BufferProvider + ?Sized> BufferProvider for &T {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn bus_address(&self, offset: usize) -> anyhow::Result<u64> {
        (**self).bus_address(offset)
    }
}
