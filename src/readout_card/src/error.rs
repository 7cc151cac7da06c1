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

use std::convert::Infallible;

use thiserror::Error;

use crate::channel::ChannelState;
use crate::link::LinkId;
use crate::parameters::CardType;

/// The error type for readout card operations
#[derive(Error, Debug)]
pub enum ReadoutError {
    /// No transfer slot is left on any link; drain the ready queue and
    /// call `fill` before pushing again
    #[error("Could not push superpage, transfer queue was full")]
    QueueFull,

    /// The least-loaded link had no room although the channel-wide slot
    /// counter said otherwise. The queue bookkeeping can no longer be trusted.
    #[error("Could not push superpage, queue of link {link} was full (capacity {capacity})")]
    LinkQueueFull { link: LinkId, capacity: usize },

    /// The ready queue holds no completed superpage
    #[error("Ready queue was empty")]
    QueueEmpty,

    /// The loopback / data source / generator / reset combination is not
    /// valid for the card family
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// The firmware reported more completed superpages than the driver has
    /// outstanding on that link
    #[error(
        "Firmware reported more superpages available ({}) than present in the queue of link {link} ({pending}); driver received {driver_count}, firmware counted {hardware_count}",
        hardware_count.wrapping_sub(*driver_count)
    )]
    ProtocolViolation {
        link: LinkId,
        hardware_count: u32,
        driver_count: u32,
        pending: usize,
    },

    /// After stopping, superpages were left on a link or transfer slots were
    /// unaccounted for
    #[error(
        "Queues did not drain on stop: {remaining} superpage(s) left on link {link}, {slots_available} of {capacity} transfer slots available"
    )]
    DrainIncomplete {
        link: LinkId,
        remaining: usize,
        slots_available: usize,
        capacity: usize,
    },

    /// The superpage cannot be handed to the DMA engine
    #[error("Invalid superpage (offset {offset:#x}, size {size:#x}): {reason}")]
    InvalidSuperpage {
        offset: usize,
        size: usize,
        reason: &'static str,
    },

    /// A link id outside of what the card supports was requested
    #[error("Link id {link} not supported, maximum is {max}")]
    InvalidLinkId { link: u32, max: u32 },

    /// The channel number is not one the card family exposes
    #[error("Channel {channel} not supported by {card} card")]
    InvalidChannel { channel: u32, card: CardType },

    /// The operation is not allowed in the current lifecycle state
    #[error("Cannot {operation} while channel is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ChannelState,
    },

    /// A channel parameter has an unusable value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A register or buffer access failed in the hardware layer
    #[error("Hardware access failed: {0:#}")]
    Hardware(#[from] anyhow::Error),

    /// A generic error with a message
    #[error("{0}")]
    Error(String),
}

impl From<Infallible> for ReadoutError {
    fn from(_: Infallible) -> Self {
        "Impossible as this is an infallible error".into()
    }
}

impl From<&str> for ReadoutError {
    fn from(s: &str) -> Self {
        ReadoutError::Error(s.to_string())
    }
}

impl ReadoutError {
    /// Determines whether the error means the channel's queue state can no
    /// longer be trusted.
    ///
    /// Capacity and configuration errors are returned to the caller as normal
    /// conditions: retry after polling, or fix the parameters. Fatal errors
    /// are desynchronisations between driver and firmware bookkeeping (or a
    /// failed register access) and are never retried by the channel.
    pub fn is_fatal(&self) -> bool {
        // wildcard _ or matches! not used here purposefully so that new error
        // variants have to be classified explicitly.
        match self {
            ReadoutError::LinkQueueFull { .. }
            | ReadoutError::ProtocolViolation { .. }
            | ReadoutError::DrainIncomplete { .. }
            | ReadoutError::Hardware(_) => true,

            ReadoutError::QueueFull
            | ReadoutError::QueueEmpty
            | ReadoutError::UnsupportedConfiguration(_)
            | ReadoutError::InvalidSuperpage { .. }
            | ReadoutError::InvalidLinkId { .. }
            | ReadoutError::InvalidChannel { .. }
            | ReadoutError::InvalidState { .. }
            | ReadoutError::InvalidParameter(_)
            | ReadoutError::Error(_) => false,
        }
    }
}

/// Creates a `ReadoutError::Error` from a string literal or format string
#[macro_export]
macro_rules! new_error {
    ($msg:literal $(,)?) => {{
        let __args = std::format_args!($msg);
        let __err_msg = match __args.as_str() {
            Some(msg) => String::from(msg),
            None => std::format!($msg),
        };
        $crate::ReadoutError::Error(__err_msg)
    }};
    ($fmtstr:expr, $($arg:tt)*) => {{
           let __err_msg = std::format!($fmtstr, $($arg)*);
           $crate::error::ReadoutError::Error(__err_msg)
    }};
}
