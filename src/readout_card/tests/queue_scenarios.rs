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

use readout_card::dummy::{Completion, DummyBuffer, DummyRegisters};
use readout_card::{
    CardRegisters, CardType, ChannelParameters, ChannelState, DmaChannel, LinkId, ReadoutError,
};

pub mod common;
use common::{started_channel, superpage, SUPERPAGE_SIZE};

#[test]
fn pushes_are_spread_evenly() {
    let mut channel = started_channel(3, 4);
    for n in 0..9 {
        channel.push(superpage(n)).unwrap();
    }
    assert_eq!(
        channel.link_queue_sizes().collect::<Vec<_>>(),
        vec![(LinkId(0), 3), (LinkId(1), 3), (LinkId(2), 3)]
    );
    assert_eq!(channel.transfer_slots_available(), 3);
}

#[test]
fn one_arrival_makes_room_for_one_push() {
    let mut channel = started_channel(2, 4);
    assert_eq!(channel.transfer_queue_capacity(), 8);
    for n in 0..8 {
        channel.push(superpage(n)).unwrap();
    }
    let err = channel.push(superpage(8)).unwrap_err();
    assert!(matches!(err, ReadoutError::QueueFull));
    assert!(!err.is_fatal());

    channel.registers_mut().complete(LinkId(0), 1);
    channel.fill().unwrap();
    assert_eq!(channel.ready_queue_size(), 1);
    assert_eq!(channel.transfer_slots_available(), 1);

    channel.push(superpage(8)).unwrap();
    assert_eq!(channel.transfer_slots_available(), 0);
    assert_eq!(channel.recompute_transfer_slots(), 0);
}

#[test]
fn rejected_push_changes_nothing() {
    let mut channel = started_channel(2, 2);
    for n in 0..4 {
        channel.push(superpage(n)).unwrap();
    }
    let pushed_before = channel.registers().commands().len();
    let sizes_before = channel.link_queue_sizes().collect::<Vec<_>>();

    for n in 4..10 {
        assert!(matches!(
            channel.push(superpage(n)),
            Err(ReadoutError::QueueFull)
        ));
    }
    assert_eq!(channel.registers().commands().len(), pushed_before);
    assert_eq!(channel.link_queue_sizes().collect::<Vec<_>>(), sizes_before);
}

#[test]
fn over_reported_arrivals_are_fatal_and_change_nothing() {
    let mut channel = started_channel(2, 4);
    for n in 0..4 {
        channel.push(superpage(n)).unwrap();
    }
    channel.registers_mut().complete(LinkId(0), 1);
    // two pending on link 1, the card claims five
    channel.registers_mut().set_arrived(LinkId(1), 5);

    let err = channel.fill().unwrap_err();
    assert!(err.is_fatal());
    match err {
        ReadoutError::ProtocolViolation {
            link,
            hardware_count,
            driver_count,
            pending,
        } => {
            assert_eq!(link, LinkId(1));
            assert_eq!(hardware_count, 5);
            assert_eq!(driver_count, 0);
            assert_eq!(pending, 2);
        }
        other => panic!("expected a protocol violation, got {other:?}"),
    }

    assert_eq!(channel.ready_queue_size(), 0);
    assert_eq!(
        channel.link_queue_sizes().collect::<Vec<_>>(),
        vec![(LinkId(0), 2), (LinkId(1), 2)]
    );
    assert_eq!(channel.transfer_slots_available(), 4);
}

#[test]
fn single_link_keeps_push_order() {
    let mut channel = started_channel(1, 8);
    for n in 0..5 {
        channel.push(superpage(n)).unwrap();
    }
    channel.registers_mut().complete(LinkId(0), 2);
    channel.fill().unwrap();
    channel.registers_mut().complete(LinkId(0), 3);
    channel.fill().unwrap();

    let order: Vec<usize> = std::iter::from_fn(|| channel.pop().ok())
        .map(|sp| {
            assert!(sp.is_ready());
            assert_eq!(sp.received(), SUPERPAGE_SIZE);
            sp.user_data()
        })
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

#[test]
fn fill_without_arrivals_is_idempotent() {
    let mut channel = started_channel(2, 4);
    for n in 0..6 {
        channel.push(superpage(n)).unwrap();
    }
    channel.registers_mut().complete(LinkId(1), 2);
    channel.fill().unwrap();

    let snapshot = (
        channel.ready_queue_size(),
        channel.transfer_slots_available(),
        channel.link_queue_sizes().collect::<Vec<_>>(),
    );
    for _ in 0..3 {
        channel.fill().unwrap();
    }
    assert_eq!(
        (
            channel.ready_queue_size(),
            channel.transfer_slots_available(),
            channel.link_queue_sizes().collect::<Vec<_>>(),
        ),
        snapshot
    );
}

#[test]
fn ready_queue_backpressure() {
    let mut params = common::multi_link_params(2, 4);
    params.set_ready_queue_capacity(3);
    let mut channel = DmaChannel::new(
        params,
        DummyRegisters::new(Completion::Immediate),
        DummyBuffer::new(64 * SUPERPAGE_SIZE),
    )
    .unwrap();
    channel.start().unwrap();

    for n in 0..8 {
        channel.push(superpage(n)).unwrap();
    }
    channel.fill().unwrap();
    assert!(channel.is_ready_queue_full());
    assert_eq!(channel.transfer_slots_available(), 3);

    // completions not yet collected stay with their link
    while channel.pop().is_ok() {}
    channel.fill().unwrap();
    assert_eq!(channel.ready_queue_size(), 3);
    assert_eq!(channel.transfer_slots_available(), 6);
}

#[test]
fn stop_collects_reported_superpages() {
    let mut channel = started_channel(1, 4);
    channel.push(superpage(0)).unwrap();
    channel.push(superpage(1)).unwrap();
    channel.registers_mut().complete(LinkId(0), 2);

    channel.stop().unwrap();
    assert_eq!(channel.state(), ChannelState::Stopped);
    assert_eq!(channel.ready_queue_size(), 2);
    assert!(channel.is_transfer_queue_empty());
    assert_eq!(channel.pop().unwrap().user_data(), 0);
    assert_eq!(channel.pop().unwrap().user_data(), 1);
    assert!(matches!(channel.pop(), Err(ReadoutError::QueueEmpty)));
}

#[test]
fn stop_reports_superpages_left_on_a_link() {
    let mut channel = started_channel(2, 4);
    for n in 0..6 {
        channel.push(superpage(n)).unwrap();
    }
    // link 0 has three pending, none reported: one is collected as possibly
    // in flight, two remain
    let err = channel.stop().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        ReadoutError::DrainIncomplete {
            link: LinkId(0),
            remaining: 2,
            ..
        }
    ));
    assert_eq!(channel.state(), ChannelState::Stopped);
    assert!(!channel.registers().is_buffer_ready());
}

#[test]
fn boxed_backend() {
    let mut params = ChannelParameters::new(CardType::Crorc);
    params.set_settle_times(Default::default(), Default::default());
    let registers: Box<dyn CardRegisters> = Box::new(DummyRegisters::new(Completion::Immediate));
    let mut channel = DmaChannel::new(params, registers, DummyBuffer::new(SUPERPAGE_SIZE)).unwrap();

    channel.start().unwrap();
    assert_eq!(channel.ready_queue_capacity(), 128);
    channel.push(superpage(0)).unwrap();
    channel.fill().unwrap();
    assert_eq!(channel.pop().unwrap().offset(), 0);
    channel.stop().unwrap();
}
