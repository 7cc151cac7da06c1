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

#![allow(dead_code)]

use std::time::Duration;

use readout_card::dummy::{Completion, DummyBuffer, DummyRegisters};
use readout_card::{CardType, ChannelParameters, DmaChannel, Superpage};

pub const PAGE: usize = ChannelParameters::DEFAULT_DMA_PAGE_SIZE;
pub const SUPERPAGE_SIZE: usize = 128 * PAGE;
pub const BUFFER_SUPERPAGES: usize = 64;

pub type DummyChannel = DmaChannel<DummyRegisters, DummyBuffer>;

/// Parameters for a multi-link channel with the settling delays disabled.
pub fn multi_link_params(links: u32, link_capacity: usize) -> ChannelParameters {
    let mut params = ChannelParameters::new(CardType::Cru);
    params.set_link_mask(0..links);
    params.set_link_queue_capacity(link_capacity);
    params.set_settle_times(Duration::ZERO, Duration::ZERO);
    params
}

/// A started channel backed by the in-memory card, completions under test
/// control.
pub fn started_channel(links: u32, link_capacity: usize) -> DummyChannel {
    let mut channel = DmaChannel::new(
        multi_link_params(links, link_capacity),
        DummyRegisters::new(Completion::Manual),
        DummyBuffer::new(BUFFER_SUPERPAGES * SUPERPAGE_SIZE),
    )
    .unwrap();
    channel.start().unwrap();
    channel
}

/// The `n`-th superpage of the buffer, tagged with `n`
pub fn superpage(n: usize) -> Superpage {
    Superpage::new((n % BUFFER_SUPERPAGES) * SUPERPAGE_SIZE, SUPERPAGE_SIZE).with_user_data(n)
}
