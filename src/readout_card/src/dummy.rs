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

//! A card that exists only in memory.
//!
//! [`DummyRegisters`] keeps the firmware side of the superpage protocol:
//! per-link counters of pushed and completed superpages, plus whatever the
//! control registers were last set to. Every register write is appended to a
//! command log so tests can assert on the exact sequence a channel issued.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail};
use tracing::{Span, instrument};

use crate::link::LinkId;
use crate::parameters::{DataSource, GeneratorPattern};
use crate::registers::{BufferProvider, CardRegisters};

/// When the simulated firmware reports pushed superpages as complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    /// Everything pushed is complete at the next poll
    #[default]
    Immediate,
    /// Nothing completes until [`DummyRegisters::complete`] or
    /// [`DummyRegisters::set_arrived`] is called
    Manual,
}

/// A register write issued by the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PushSuperpage {
        link: LinkId,
        pages: u32,
        bus_address: u64,
    },
    SetDataSource(DataSource),
    SetGeneratorPattern {
        pattern: GeneratorPattern,
        size: usize,
        random_size: bool,
    },
    SetBufferReady(bool),
    ResetGeneratorCounter,
    ResetCard,
    ResetExternal {
        include_siu: bool,
    },
    SetDebugMode(bool),
    EnableDataTaking,
    DisableDataTaking,
    InjectError,
}

#[derive(Debug, Default, Clone, Copy)]
struct LinkCounters {
    pushed: u32,
    arrived: u32,
}

/// Software implementation of [`CardRegisters`]
#[derive(Debug, Default)]
pub struct DummyRegisters {
    completion: Completion,
    links: BTreeMap<LinkId, LinkCounters>,
    commands: Vec<Command>,
    data_source: Option<DataSource>,
    buffer_ready: bool,
    debug_mode: bool,
    data_taking: bool,
    dropped_packets: u32,
    fail_next: Option<String>,
}

impl DummyRegisters {
    pub fn new(completion: Completion) -> Self {
        Self {
            completion,
            ..Default::default()
        }
    }

    pub fn completion(&self) -> Completion {
        self.completion
    }

    pub fn set_completion(&mut self, completion: Completion) {
        self.completion = completion;
    }

    /// Complete the `n` oldest outstanding superpages of `link`. Never
    /// completes more than were pushed.
    pub fn complete(&mut self, link: LinkId, n: u32) {
        let counters = self.links.entry(link).or_default();
        let outstanding = counters.pushed.wrapping_sub(counters.arrived);
        counters.arrived = counters.arrived.wrapping_add(n.min(outstanding));
    }

    /// Complete every outstanding superpage on every link
    pub fn complete_all(&mut self) {
        for counters in self.links.values_mut() {
            counters.arrived = counters.pushed;
        }
    }

    /// Force the completion counter of `link`, even beyond what was pushed
    pub fn set_arrived(&mut self, link: LinkId, count: u32) {
        self.links.entry(link).or_default().arrived = count;
    }

    /// Superpage descriptors pushed to `link` since the last card reset
    pub fn pushed(&self, link: LinkId) -> u32 {
        self.links.get(&link).map_or(0, |c| c.pushed)
    }

    /// Completion counter of `link` as the firmware would report it
    pub fn arrived(&self, link: LinkId) -> u32 {
        self.links.get(&link).map_or(0, |c| c.arrived)
    }

    /// Make the next register access fail with `message`
    pub fn fail_next(&mut self, message: impl Into<String>) {
        self.fail_next = Some(message.into());
    }

    pub fn set_dropped_packets(&mut self, dropped: u32) {
        self.dropped_packets = dropped;
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn data_source(&self) -> Option<DataSource> {
        self.data_source
    }

    pub fn is_buffer_ready(&self) -> bool {
        self.buffer_ready
    }

    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn is_data_taking(&self) -> bool {
        self.data_taking
    }

    fn access(&mut self) -> anyhow::Result<()> {
        match self.fail_next.take() {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }

    fn write(&mut self, command: Command) -> anyhow::Result<()> {
        self.access()?;
        self.commands.push(command);
        Ok(())
    }
}

impl CardRegisters for DummyRegisters {
    fn push_superpage_descriptor(
        &mut self,
        link: LinkId,
        pages: u32,
        bus_address: u64,
    ) -> anyhow::Result<()> {
        self.write(Command::PushSuperpage {
            link,
            pages,
            bus_address,
        })?;
        let counters = self.links.entry(link).or_default();
        counters.pushed = counters.pushed.wrapping_add(1);
        Ok(())
    }

    fn superpage_count(&mut self, link: LinkId) -> anyhow::Result<u32> {
        self.access()?;
        let counters = self.links.entry(link).or_default();
        if self.completion == Completion::Immediate {
            counters.arrived = counters.pushed;
        }
        Ok(counters.arrived)
    }

    fn set_data_source(&mut self, source: DataSource) -> anyhow::Result<()> {
        self.write(Command::SetDataSource(source))?;
        self.data_source = Some(source);
        Ok(())
    }

    fn set_data_generator_pattern(
        &mut self,
        pattern: GeneratorPattern,
        size: usize,
        random_size: bool,
    ) -> anyhow::Result<()> {
        self.write(Command::SetGeneratorPattern {
            pattern,
            size,
            random_size,
        })
    }

    fn set_buffer_ready(&mut self, ready: bool) -> anyhow::Result<()> {
        self.write(Command::SetBufferReady(ready))?;
        self.buffer_ready = ready;
        Ok(())
    }

    fn reset_data_generator_counter(&mut self) -> anyhow::Result<()> {
        self.write(Command::ResetGeneratorCounter)
    }

    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    fn reset_card(&mut self) -> anyhow::Result<()> {
        self.write(Command::ResetCard)?;
        self.links.clear();
        Ok(())
    }

    fn reset_external(&mut self, include_siu: bool) -> anyhow::Result<()> {
        self.write(Command::ResetExternal { include_siu })
    }

    fn set_debug_mode(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.write(Command::SetDebugMode(enabled))?;
        self.debug_mode = enabled;
        Ok(())
    }

    fn debug_mode(&mut self) -> anyhow::Result<bool> {
        self.access()?;
        Ok(self.debug_mode)
    }

    fn enable_data_taking(&mut self) -> anyhow::Result<()> {
        self.write(Command::EnableDataTaking)?;
        self.data_taking = true;
        Ok(())
    }

    fn disable_data_taking(&mut self) -> anyhow::Result<()> {
        self.write(Command::DisableDataTaking)?;
        self.data_taking = false;
        Ok(())
    }

    fn dropped_packets(&mut self) -> anyhow::Result<u32> {
        self.access()?;
        Ok(self.dropped_packets)
    }

    fn inject_generator_error(&mut self) -> anyhow::Result<()> {
        self.write(Command::InjectError)
    }
}

/// A DMA buffer that is never written, mapped linearly at `base` on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DummyBuffer {
    base: u64,
    size: usize,
}

impl DummyBuffer {
    pub const DEFAULT_BASE: u64 = 0x1_0000_0000;

    pub fn new(size: usize) -> Self {
        Self::with_base(Self::DEFAULT_BASE, size)
    }

    pub fn with_base(base: u64, size: usize) -> Self {
        Self { base, size }
    }

    pub fn base(&self) -> u64 {
        self.base
    }
}

impl BufferProvider for DummyBuffer {
    fn size(&self) -> usize {
        self.size
    }

    fn bus_address(&self, offset: usize) -> anyhow::Result<u64> {
        if offset >= self.size {
            bail!(
                "offset {offset:#x} outside of DMA buffer of {:#x} bytes",
                self.size
            );
        }
        u64::try_from(offset)
            .ok()
            .and_then(|offset| self.base.checked_add(offset))
            .ok_or_else(|| anyhow!("bus address of offset {offset:#x} overflows"))
    }
}
