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

use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use tracing::{Span, instrument};

use crate::error::ReadoutError;
use crate::link::LinkId;
use crate::Result;

/// Declares a fieldless enum together with its `Display` name and a
/// case-insensitive `FromStr` accepting the same name.
macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $text:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant
            ),+
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = match self {
                    $( Self::$variant => $text, )+
                };
                f.write_str(text)
            }
        }

        impl FromStr for $name {
            type Err = ReadoutError;

            fn from_str(s: &str) -> Result<Self> {
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok(Self::$variant);
                    }
                )+
                Err(ReadoutError::InvalidParameter(format!(
                    "unknown {} '{}'",
                    stringify!($name),
                    s
                )))
            }
        }
    };
}

named_enum! {
    /// The card family a channel drives
    pub enum CardType {
        /// Multi-link family: one DMA channel, up to 24 links
        Cru => "CRU",
        /// Single-link family
        Crorc => "CRORC",
        /// Software-simulated card
        Dummy => "DUMMY",
    }
}

named_enum! {
    /// How deep a channel reset goes
    pub enum ResetLevel {
        Nothing => "NOTHING",
        /// Card-internal reset only
        Internal => "INTERNAL",
        /// Also reset the DIU of the external optical link
        InternalDiu => "INTERNAL_DIU",
        /// Also reset the DIU and the SIU at the far end of the link
        InternalDiuSiu => "INTERNAL_DIU_SIU",
    }
}

named_enum! {
    /// Where the data generator's output is looped back
    pub enum LoopbackMode {
        /// No loopback, data comes from the front-end link
        None => "NONE",
        /// Generator data is looped back inside the card
        Internal => "INTERNAL",
        Diu => "DIU",
        Siu => "SIU",
        /// Generator in the link's data generator block
        Ddg => "DDG",
    }
}

named_enum! {
    pub enum GeneratorPattern {
        Incremental => "INCREMENTAL",
        Alternating => "ALTERNATING",
        Constant => "CONSTANT",
        Random => "RANDOM",
    }
}

named_enum! {
    /// Data source selector written to the card when DMA starts
    pub enum DataSource {
        /// Internal data generator
        Internal => "INTERNAL",
        /// Front-end links
        Link => "LINK",
        Ddg => "DDG",
        Diu => "DIU",
        Siu => "SIU",
    }
}

impl CardType {
    /// Number of links the family addresses
    pub const fn max_links(self) -> u32 {
        match self {
            CardType::Cru | CardType::Dummy => 24,
            CardType::Crorc => 1,
        }
    }

    /// Is link selection part of pushing a superpage?
    pub const fn is_multi_link(self) -> bool {
        self.max_links() > 1
    }

    /// Logical DMA channel numbers a card of this family exposes
    pub fn allowed_channels(self) -> RangeInclusive<u32> {
        match self {
            // one DMA channel per CRU endpoint
            CardType::Cru => 0..=0,
            CardType::Crorc => 0..=5,
            CardType::Dummy => 0..=7,
        }
    }

    /// Per-link transfer queue depth, i.e. the number of superpage
    /// descriptors the firmware FIFO of one link holds
    pub const fn default_link_queue_capacity(self) -> usize {
        match self {
            CardType::Cru | CardType::Crorc => 128,
            CardType::Dummy => 16,
        }
    }
}

impl ResetLevel {
    /// Does the reset reach beyond the card into the optical link?
    pub const fn includes_external(self) -> bool {
        matches!(self, ResetLevel::InternalDiu | ResetLevel::InternalDiuSiu)
    }

    pub const fn includes_siu(self) -> bool {
        matches!(self, ResetLevel::InternalDiuSiu)
    }
}

impl DataSource {
    /// Pick the data source for a generator / loopback combination, or
    /// reject the combination when the card family cannot do it.
    pub(crate) fn resolve(
        card: CardType,
        generator_enabled: bool,
        loopback: LoopbackMode,
    ) -> Result<Self> {
        let unsupported = |what: &str| {
            Err(ReadoutError::UnsupportedConfiguration(format!(
                "{card} does not support loopback mode {loopback} {what}"
            )))
        };

        match (card, generator_enabled, loopback) {
            (CardType::Dummy, _, _) => Ok(DataSource::Internal),

            (CardType::Cru, true, LoopbackMode::Internal) => Ok(DataSource::Internal),
            (CardType::Cru, true, LoopbackMode::Ddg) => Ok(DataSource::Link),
            (CardType::Cru, true, _) => unsupported("with the data generator"),
            (CardType::Cru, false, LoopbackMode::None) => Ok(DataSource::Link),
            (CardType::Cru, false, _) => unsupported("without the data generator"),

            (CardType::Crorc, true, LoopbackMode::Internal) => Ok(DataSource::Internal),
            (CardType::Crorc, true, LoopbackMode::Diu) => Ok(DataSource::Diu),
            (CardType::Crorc, true, LoopbackMode::Siu) => Ok(DataSource::Siu),
            (CardType::Crorc, true, _) => unsupported("with the data generator"),
            (CardType::Crorc, false, LoopbackMode::None) => Ok(DataSource::Link),
            (CardType::Crorc, false, _) => unsupported("without the data generator"),
        }
    }

    /// Does data flow in from the front-end, so that data taking has to be
    /// switched on?
    pub const fn is_external(self) -> bool {
        matches!(self, DataSource::Link)
    }
}

/// Check that a reset of `level` makes sense for the card and loopback
/// mode. Only the single-link family has DIU/SIU endpoints to reset.
pub(crate) fn check_reset_level(
    card: CardType,
    level: ResetLevel,
    loopback: LoopbackMode,
) -> Result<()> {
    if card != CardType::Crorc || !level.includes_external() {
        return Ok(());
    }

    match (level, loopback) {
        (_, LoopbackMode::None | LoopbackMode::Siu) => Ok(()),
        (ResetLevel::InternalDiu, LoopbackMode::Diu) => Ok(()),
        _ => Err(ReadoutError::UnsupportedConfiguration(format!(
            "reset level {level} cannot be used with loopback mode {loopback}"
        ))),
    }
}

/// The complete set of configuration needed to create a DMA channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelParameters {
    card_type: CardType,
    channel_number: u32,
    link_mask: BTreeSet<u32>,
    dma_page_size: usize,
    generator_enabled: bool,
    generator_pattern: GeneratorPattern,
    /// Bytes the generator writes per DMA page. `None` means a full page.
    generator_data_size: Option<usize>,
    generator_random_size: bool,
    loopback_mode: LoopbackMode,
    initial_reset_level: ResetLevel,
    link_queue_capacity: Option<usize>,
    ready_queue_capacity: Option<usize>,
    reset_settle_time: Duration,
    arm_settle_time: Duration,
}

impl ChannelParameters {
    /// The default DMA page size (8 KiB)
    pub const DEFAULT_DMA_PAGE_SIZE: usize = 8 * 1024;
    /// Wait after each reset register write
    pub const DEFAULT_RESET_SETTLE_TIME: Duration = Duration::from_millis(100);
    /// Wait after arming the buffer
    pub const DEFAULT_ARM_SETTLE_TIME: Duration = Duration::from_millis(10);
    /// Superpage offsets have to be 32-bit aligned
    pub const SUPERPAGE_OFFSET_ALIGNMENT: usize = 4;

    /// Create the default configuration for a card family
    pub fn new(card_type: CardType) -> Self {
        Self {
            card_type,
            channel_number: 0,
            link_mask: BTreeSet::new(),
            dma_page_size: Self::DEFAULT_DMA_PAGE_SIZE,
            generator_enabled: true,
            generator_pattern: GeneratorPattern::Incremental,
            generator_data_size: None,
            generator_random_size: false,
            loopback_mode: LoopbackMode::Internal,
            initial_reset_level: ResetLevel::Internal,
            link_queue_capacity: None,
            ready_queue_capacity: None,
            reset_settle_time: Self::DEFAULT_RESET_SETTLE_TIME,
            arm_settle_time: Self::DEFAULT_ARM_SETTLE_TIME,
        }
    }

    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    pub fn set_channel_number(&mut self, channel_number: u32) {
        self.channel_number = channel_number;
    }

    pub fn channel_number(&self) -> u32 {
        self.channel_number
    }

    /// Select the links to enable. Ignored by single-link families.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn set_link_mask(&mut self, links: impl IntoIterator<Item = u32>) {
        self.link_mask = links.into_iter().collect();
    }

    pub fn set_dma_page_size(&mut self, dma_page_size: usize) {
        self.dma_page_size = dma_page_size;
    }

    pub fn dma_page_size(&self) -> usize {
        self.dma_page_size
    }

    pub fn set_generator_enabled(&mut self, enabled: bool) {
        self.generator_enabled = enabled;
    }

    pub fn generator_enabled(&self) -> bool {
        self.generator_enabled
    }

    pub fn set_generator_pattern(&mut self, pattern: GeneratorPattern) {
        self.generator_pattern = pattern;
    }

    pub fn generator_pattern(&self) -> GeneratorPattern {
        self.generator_pattern
    }

    pub fn set_generator_data_size(&mut self, size: usize) {
        self.generator_data_size = Some(size);
    }

    /// Bytes written per DMA page by the generator; a full page by default
    pub fn generator_data_size(&self) -> usize {
        self.generator_data_size.unwrap_or(self.dma_page_size)
    }

    pub fn set_generator_random_size(&mut self, enabled: bool) {
        self.generator_random_size = enabled;
    }

    pub fn generator_random_size(&self) -> bool {
        self.generator_random_size
    }

    pub fn set_loopback_mode(&mut self, mode: LoopbackMode) {
        self.loopback_mode = mode;
    }

    pub fn loopback_mode(&self) -> LoopbackMode {
        self.loopback_mode
    }

    pub fn set_initial_reset_level(&mut self, level: ResetLevel) {
        self.initial_reset_level = level;
    }

    pub fn initial_reset_level(&self) -> ResetLevel {
        self.initial_reset_level
    }

    /// Override the family's per-link transfer queue depth
    pub fn set_link_queue_capacity(&mut self, capacity: usize) {
        self.link_queue_capacity = Some(capacity);
    }

    pub fn link_queue_capacity(&self) -> usize {
        self.link_queue_capacity
            .unwrap_or(self.card_type.default_link_queue_capacity())
    }

    /// Override the ready queue depth
    pub fn set_ready_queue_capacity(&mut self, capacity: usize) {
        self.ready_queue_capacity = Some(capacity);
    }

    /// Ready queue depth; by default room for every superpage that can be
    /// in flight on the enabled links
    pub fn ready_queue_capacity(&self, link_count: usize) -> usize {
        self.ready_queue_capacity
            .unwrap_or(self.link_queue_capacity() * link_count)
    }

    /// Set the settling delays applied after reset writes and after arming
    /// the buffer. Zero disables the wait, which only makes sense against a
    /// simulated card.
    pub fn set_settle_times(&mut self, reset: Duration, arm: Duration) {
        self.reset_settle_time = reset;
        self.arm_settle_time = arm;
    }

    pub fn reset_settle_time(&self) -> Duration {
        self.reset_settle_time
    }

    pub fn arm_settle_time(&self) -> Duration {
        self.arm_settle_time
    }

    /// Validate everything that does not depend on the hardware state and
    /// return the links the channel will drive, in ascending order.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub(crate) fn validate(&self) -> Result<Vec<LinkId>> {
        if !self
            .card_type
            .allowed_channels()
            .contains(&self.channel_number)
        {
            return Err(ReadoutError::InvalidChannel {
                channel: self.channel_number,
                card: self.card_type,
            });
        }

        if self.dma_page_size == 0 {
            return Err(ReadoutError::InvalidParameter(
                "DMA page size must not be zero".to_string(),
            ));
        }

        if self.link_queue_capacity() == 0 {
            return Err(ReadoutError::InvalidParameter(
                "link queue capacity must not be zero".to_string(),
            ));
        }

        if self.generator_enabled && self.generator_data_size() == 0 {
            return Err(ReadoutError::InvalidParameter(
                "generator data size must not be zero".to_string(),
            ));
        }

        let links = if !self.card_type.is_multi_link() || self.link_mask.is_empty() {
            vec![LinkId(0)]
        } else {
            let max = self.card_type.max_links();
            self.link_mask
                .iter()
                .map(|&id| {
                    if id >= max {
                        Err(ReadoutError::InvalidLinkId { link: id, max: max - 1 })
                    } else {
                        Ok(LinkId(id))
                    }
                })
                .collect::<Result<Vec<_>>>()?
        };

        if self.ready_queue_capacity(links.len()) == 0 {
            return Err(ReadoutError::InvalidParameter(
                "ready queue capacity must not be zero".to_string(),
            ));
        }

        Ok(links)
    }
}

impl Default for ChannelParameters {
    fn default() -> Self {
        Self::new(CardType::Dummy)
    }
}
