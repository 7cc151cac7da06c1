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

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use readout_card::dummy::{Completion, DummyBuffer, DummyRegisters};
use readout_card::{
    CardType, ChannelParameters, ChannelState, DmaChannel, LinkId, ReadoutError, ResetLevel,
    Superpage,
};

const PAGE: usize = ChannelParameters::DEFAULT_DMA_PAGE_SIZE;
const BUFFER_SIZE: usize = 64 * PAGE;

#[derive(Arbitrary, Debug)]
enum Op {
    Push { offset: u16, pages: u8 },
    Complete { link: u8, n: u8 },
    /// Lets the card claim any completion count, including impossible ones
    SetArrived { link: u8, count: u32 },
    Fill,
    Pop,
    Start,
    Stop,
    Reset,
}

#[derive(Arbitrary, Debug)]
struct Input {
    links: u8,
    link_capacity: u8,
    ready_capacity: u8,
    ops: Vec<Op>,
}

// Drives random operation sequences through a channel on the in-memory card
// and checks the slot bookkeeping after every step. Fatal errors end the run,
// since the channel state is no longer meaningful after them.
fuzz_target!(|input: Input| {
    let links = u32::from(input.links % 24) + 1;
    let mut params = ChannelParameters::new(CardType::Cru);
    params.set_link_mask(0..links);
    params.set_link_queue_capacity(usize::from(input.link_capacity % 16) + 1);
    params.set_ready_queue_capacity(usize::from(input.ready_capacity % 32) + 1);
    params.set_settle_times(Duration::ZERO, Duration::ZERO);

    let mut channel = DmaChannel::new(
        params,
        DummyRegisters::new(Completion::Manual),
        DummyBuffer::new(BUFFER_SIZE),
    )
    .unwrap();

    for op in input.ops {
        let result = match op {
            Op::Push { offset, pages } => channel.push(Superpage::new(
                usize::from(offset),
                usize::from(pages) * PAGE,
            )),
            Op::Complete { link, n } => {
                channel
                    .registers_mut()
                    .complete(LinkId(u32::from(link) % links), u32::from(n));
                Ok(())
            }
            Op::SetArrived { link, count } => {
                channel
                    .registers_mut()
                    .set_arrived(LinkId(u32::from(link) % links), count);
                Ok(())
            }
            Op::Fill => channel.fill(),
            Op::Pop => channel.pop().map(|sp| assert!(sp.is_ready())),
            Op::Start => channel.start(),
            Op::Stop => channel.stop(),
            Op::Reset => channel.reset(ResetLevel::Internal),
        };

        assert_eq!(
            channel.transfer_slots_available(),
            channel.recompute_transfer_slots()
        );
        assert!(channel.ready_queue_size() <= channel.ready_queue_capacity());

        match result {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return,
            Err(
                ReadoutError::QueueFull
                | ReadoutError::QueueEmpty
                | ReadoutError::InvalidSuperpage { .. }
                | ReadoutError::InvalidState { .. },
            ) => {}
            Err(e) => panic!("unexpected error {e:?} in state {:?}", channel.state()),
        }
        assert_ne!(channel.state(), ChannelState::Resetting);
    }
});
