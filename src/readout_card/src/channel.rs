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

use std::thread;
use std::time::Duration;

use tracing::{Span, debug, error, info, instrument, warn};

use crate::engine::QueueEngine;
use crate::error::ReadoutError;
use crate::link::LinkId;
use crate::metrics::HistogramMetric;
use crate::parameters::{
    CardType, ChannelParameters, DataSource, LoopbackMode, ResetLevel, check_reset_level,
};
use crate::registers::{BufferProvider, CardRegisters};
use crate::superpage::Superpage;
use crate::Result;

/// Lifecycle state of a [`DmaChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Hardware reset in progress, either on request while stopped or as
    /// part of starting
    Resetting,
}

/// One DMA channel of a readout card.
///
/// The producer hands superpages to the card with [`push`](Self::push), the
/// consumer polls for completions with [`fill`](Self::fill) and takes them
/// with [`pop`](Self::pop). The channel is single-owner: nothing in it
/// locks, and every method takes `&self` or `&mut self`.
pub struct DmaChannel<R: CardRegisters, B: BufferProvider> {
    params: ChannelParameters,
    registers: R,
    buffer: B,
    engine: QueueEngine,
    state: ChannelState,
    /// Set when this channel switched the debug register on and has to
    /// switch it off again when closed
    debug_mode_set: bool,
}

/// Waits for the hardware to settle after a register write
fn settle(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

impl<R: CardRegisters, B: BufferProvider> DmaChannel<R, B> {
    /// Opens a channel. No register is written until [`start`](Self::start).
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn new(params: ChannelParameters, registers: R, buffer: B) -> Result<Self> {
        let links = params.validate()?;
        check_reset_level(
            params.card_type(),
            params.initial_reset_level(),
            params.loopback_mode(),
        )?;

        if params.dma_page_size() != ChannelParameters::DEFAULT_DMA_PAGE_SIZE {
            warn!(
                dma_page_size = params.dma_page_size(),
                "DMA page size not default; behaviour undefined"
            );
        }

        info!(
            card = %params.card_type(),
            channel = params.channel_number(),
            links = ?links.iter().map(|l| l.0).collect::<Vec<_>>(),
            "Enabled link(s)"
        );
        if params.generator_enabled() {
            info!(
                pattern = %params.generator_pattern(),
                loopback = %params.loopback_mode(),
                data_size = params.generator_data_size(),
                "Data generator enabled"
            );
        } else {
            info!(loopback = %params.loopback_mode(), "Data generator disabled");
        }

        let engine = QueueEngine::new(
            &links,
            params.link_queue_capacity(),
            params.ready_queue_capacity(links.len()),
        );

        Ok(Self {
            params,
            registers,
            buffer,
            engine,
            state: ChannelState::Stopped,
            debug_mode_set: false,
        })
    }

    /// Configures the data source, resets the card, clears every queue and
    /// arms the buffer. On failure the channel stays stopped.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            ChannelState::Stopped => {}
            ChannelState::Running => {
                info!("DMA was already started");
                return Ok(());
            }
            state @ (ChannelState::Starting
            | ChannelState::Stopping
            | ChannelState::Resetting) => {
                return Err(ReadoutError::InvalidState {
                    operation: "start",
                    state,
                });
            }
        }

        HistogramMetric::time_and_emit_transition("start", || {
            self.state = ChannelState::Starting;
            let result = self.start_sequence();
            self.state = match result {
                Ok(()) => ChannelState::Running,
                Err(_) => ChannelState::Stopped,
            };
            result
        })
    }

    fn start_sequence(&mut self) -> Result<()> {
        let card = self.params.card_type();
        let source = DataSource::resolve(
            card,
            self.params.generator_enabled(),
            self.params.loopback_mode(),
        )?;

        if self.params.generator_enabled() {
            self.registers.set_data_generator_pattern(
                self.params.generator_pattern(),
                self.params.generator_data_size(),
                self.params.generator_random_size(),
            )?;
        }
        if self.needs_debug_mode() {
            self.enable_debug_mode()?;
        }
        self.registers.set_data_source(source)?;
        debug!(%source, "Data source selected");

        // starting always resets the card, at least internally
        let level = match self.params.initial_reset_level() {
            ResetLevel::Nothing => ResetLevel::Internal,
            level => level,
        };
        self.state = ChannelState::Resetting;
        self.reset_sequence(level)?;
        self.state = ChannelState::Starting;

        self.engine.reset();

        self.registers.set_buffer_ready(true)?;
        if let Err(e) = self.begin_data_taking(source) {
            self.disarm_after_failed_start();
            return Err(e);
        }

        info!(%source, "DMA started");
        Ok(())
    }

    fn begin_data_taking(&mut self, source: DataSource) -> Result<()> {
        settle(self.params.arm_settle_time());
        self.registers.disable_data_taking()?;
        if source.is_external() {
            self.registers.enable_data_taking()?;
        }
        Ok(())
    }

    // The buffer is armed at this point; a stopped channel must not leave
    // the card writing into it.
    fn disarm_after_failed_start(&mut self) {
        if let Err(e) = self.registers.set_buffer_ready(false) {
            error!(error = ?e, "Failed to disarm DMA buffer after failed start");
        }
        if let Err(e) = self.registers.disable_data_taking() {
            error!(error = ?e, "Failed to disable data taking after failed start");
        }
    }

    /// Disarms the buffer and moves every superpage still on a link to the
    /// ready queue. Fails if a link could not be emptied; the channel is
    /// stopped either way.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            ChannelState::Running => {}
            ChannelState::Stopped => {
                info!("DMA was already stopped");
                return Ok(());
            }
            state @ (ChannelState::Starting
            | ChannelState::Stopping
            | ChannelState::Resetting) => {
                return Err(ReadoutError::InvalidState {
                    operation: "stop",
                    state,
                });
            }
        }

        HistogramMetric::time_and_emit_transition("stop", || {
            self.state = ChannelState::Stopping;
            let result = self.stop_sequence();
            self.state = ChannelState::Stopped;
            result
        })
    }

    fn stop_sequence(&mut self) -> Result<()> {
        self.registers.set_buffer_ready(false)?;
        self.registers.disable_data_taking()?;

        let registers = &mut self.registers;
        let moved = self
            .engine
            .drain(|link| registers.superpage_count(link))?;
        info!(moved, "Moved superpages to ready queue on stop");
        Ok(())
    }

    /// Resets the card without touching the queues. Only allowed while the
    /// channel is stopped.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn reset(&mut self, level: ResetLevel) -> Result<()> {
        if level == ResetLevel::Nothing {
            return Ok(());
        }
        if self.state != ChannelState::Stopped {
            return Err(ReadoutError::InvalidState {
                operation: "reset",
                state: self.state,
            });
        }
        check_reset_level(self.params.card_type(), level, self.params.loopback_mode())?;

        HistogramMetric::time_and_emit_transition("reset", || {
            self.state = ChannelState::Resetting;
            let result = self.reset_sequence(level);
            self.state = ChannelState::Stopped;
            result
        })
    }

    fn reset_sequence(&mut self, level: ResetLevel) -> Result<()> {
        let card = self.params.card_type();
        if level == ResetLevel::Nothing {
            return Ok(());
        }
        if level.includes_external() && card != CardType::Crorc {
            warn!(%level, %card, "Card has no DIU/SIU, performing internal reset only");
        }

        if self.needs_debug_mode() {
            self.enable_debug_mode()?;
        }

        let settle_time = self.params.reset_settle_time();
        self.registers.reset_data_generator_counter()?;
        settle(settle_time);
        self.registers.reset_card()?;
        settle(settle_time);

        if card == CardType::Crorc && level.includes_external() {
            self.registers.reset_external(level.includes_siu())?;
            settle(settle_time);
        }

        debug!(%level, "Card reset");
        Ok(())
    }

    /// Internal loopback on the multi-link family goes through the debug
    /// register
    fn needs_debug_mode(&self) -> bool {
        self.params.card_type() == CardType::Cru
            && self.params.loopback_mode() == LoopbackMode::Internal
    }

    fn enable_debug_mode(&mut self) -> Result<()> {
        if !self.registers.debug_mode()? {
            self.registers.set_debug_mode(true)?;
            self.debug_mode_set = true;
        }
        Ok(())
    }

    /// Checks a superpage against the buffer and returns its size in DMA
    /// pages and its bus address.
    fn check_superpage(&self, superpage: &Superpage) -> Result<(u32, u64)> {
        let invalid = |reason| ReadoutError::InvalidSuperpage {
            offset: superpage.offset(),
            size: superpage.size(),
            reason,
        };
        let page_size = self.params.dma_page_size();

        if superpage.size() == 0 {
            return Err(invalid("size is zero"));
        }
        if superpage.size() % page_size != 0 {
            return Err(invalid("size is not a multiple of the DMA page size"));
        }
        if superpage.offset() % ChannelParameters::SUPERPAGE_OFFSET_ALIGNMENT != 0 {
            return Err(invalid("offset is not 32-bit aligned"));
        }
        match superpage.offset().checked_add(superpage.size()) {
            Some(end) if end <= self.buffer.size() => {}
            _ => return Err(invalid("superpage does not fit in the DMA buffer")),
        }

        let pages = u32::try_from(superpage.size() / page_size)
            .map_err(|_| invalid("too many DMA pages"))?;
        let bus_address = self.buffer.bus_address(superpage.offset())?;
        Ok((pages, bus_address))
    }

    /// Hands a superpage to the least-loaded link.
    ///
    /// Fails with [`ReadoutError::QueueFull`] when every link is at
    /// capacity; nothing is changed in that case.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn push(&mut self, superpage: Superpage) -> Result<()> {
        if self.state != ChannelState::Running {
            return Err(ReadoutError::InvalidState {
                operation: "push",
                state: self.state,
            });
        }
        self.engine.check_capacity()?;
        let (pages, bus_address) = self.check_superpage(&superpage)?;

        let registers = &mut self.registers;
        self.engine.push(superpage, |link| {
            registers.push_superpage_descriptor(link, pages, bus_address)
        })?;
        Ok(())
    }

    /// Polls the card once and moves completed superpages to the ready
    /// queue. Never blocks. Does nothing unless the channel is running.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn fill(&mut self) -> Result<()> {
        if self.state != ChannelState::Running {
            return Ok(());
        }
        let registers = &mut self.registers;
        self.engine.fill(|link| registers.superpage_count(link))?;
        Ok(())
    }

    /// Oldest completed superpage
    pub fn peek(&self) -> Result<&Superpage> {
        self.engine.peek()
    }

    /// Takes the oldest completed superpage
    pub fn pop(&mut self) -> Result<Superpage> {
        self.engine.pop()
    }

    pub fn transfer_slots_available(&self) -> usize {
        self.engine.transfer_slots_available()
    }

    pub fn ready_queue_size(&self) -> usize {
        self.engine.ready_queue_size()
    }

    pub fn is_transfer_queue_empty(&self) -> bool {
        self.engine.is_transfer_queue_empty()
    }

    pub fn is_ready_queue_full(&self) -> bool {
        self.engine.is_ready_queue_full()
    }

    pub fn transfer_queue_capacity(&self) -> usize {
        self.engine.transfer_queue_capacity()
    }

    pub fn ready_queue_capacity(&self) -> usize {
        self.engine.ready_queue_capacity()
    }

    /// Transfer slots counted by scanning the link queues. Always equal to
    /// [`transfer_slots_available`](Self::transfer_slots_available).
    pub fn recompute_transfer_slots(&self) -> usize {
        self.engine.recompute_transfer_slots()
    }

    pub fn card_type(&self) -> CardType {
        self.params.card_type()
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn parameters(&self) -> &ChannelParameters {
        &self.params
    }

    /// Enabled links, ascending
    pub fn link_ids(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.engine.links().iter().map(|link| link.id())
    }

    /// Pending superpages per link
    pub fn link_queue_sizes(&self) -> impl Iterator<Item = (LinkId, usize)> + '_ {
        self.engine
            .links()
            .iter()
            .map(|link| (link.id(), link.pending()))
    }

    /// Packets the card dropped for lack of superpages
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn dropped_packets(&mut self) -> Result<u32> {
        Ok(self.registers.dropped_packets()?)
    }

    /// Makes the data generator emit one corrupted word. Returns `false`
    /// when the generator is not in use or the card is not a CRU.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn inject_error(&mut self) -> Result<bool> {
        // only the CRU generator supports error injection
        if self.params.card_type() != CardType::Cru || !self.params.generator_enabled() {
            return Ok(false);
        }
        self.registers.inject_generator_error()?;
        Ok(true)
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.registers
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }
}

impl<R: CardRegisters, B: BufferProvider> Drop for DmaChannel<R, B> {
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    fn drop(&mut self) {
        if let Err(e) = self.registers.set_buffer_ready(false) {
            error!(error = ?e, "Failed to disarm DMA buffer");
        }

        let remaining = self.engine.ready_queue_size();
        if remaining > 0 {
            info!(remaining, "Superpages left in ready queue on close");
        }

        if self.debug_mode_set {
            if let Err(e) = self.registers.set_debug_mode(false) {
                error!(error = ?e, "Failed to disable debug mode");
            }
        }
    }
}
