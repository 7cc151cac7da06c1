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

//! DMA channel queue engine for PCIe readout cards.
//!
//! A [`DmaChannel`] hands superpages (slices of a DMA buffer) to the card,
//! polls the card for completed ones and queues them for the consumer. The
//! card itself is reached through the [`CardRegisters`] and
//! [`BufferProvider`] traits; [`dummy`] provides an in-memory card.
//!
//! ```text
//! let mut channel = DmaChannel::new(params, registers, buffer)?;
//! channel.start()?;
//! channel.push(Superpage::new(0, 1024 * 1024))?;
//! channel.fill()?;
//! let superpage = channel.pop()?;
//! ```

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]

/// Channel lifecycle and the consumer-facing API
pub mod channel;
/// A software card, for tests and for running without hardware
pub mod dummy;
/// Superpage distribution over links and completion tracking
mod engine;
/// Errors returned by channel operations
pub mod error;
/// Per-link transfer queues
pub mod link;
/// Metric definitions, emitted through the `metrics` facade
mod metrics;
/// Channel configuration and card families
pub mod parameters;
pub mod queue;
/// The interfaces a card backend implements
pub mod registers;
pub mod superpage;

pub use channel::{ChannelState, DmaChannel};
pub use error::ReadoutError;
pub use link::LinkId;
pub use parameters::{
    CardType, ChannelParameters, DataSource, GeneratorPattern, LoopbackMode, ResetLevel,
};
pub use registers::{BufferProvider, CardRegisters};
pub use superpage::Superpage;

/// The result type of readout card operations
pub type Result<T> = core::result::Result<T, ReadoutError>;
