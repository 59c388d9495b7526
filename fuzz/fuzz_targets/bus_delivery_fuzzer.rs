//! Fuzz target for MessageBus delivery order
//!
//! Arbitrary send and poll schedules under random delivery. Whatever the
//! interleaving, every channel must deliver its frames in send order, each
//! exactly once, to the addressed node.

#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use cohort_core::{DeliveryOrder, LogicalClock, Message, MessageBus, NodeId, Payload};
use cohort_harness::SimEnv;
use cohort_proto::Frame;
use libfuzzer_sys::fuzz_target;

const NODES: usize = 4;

#[derive(Debug, Clone, Arbitrary)]
enum BusOp {
    Send { from: u8, to: u8 },
    Poll,
}

#[derive(Debug, Clone, Arbitrary)]
struct Schedule {
    seed: u64,
    ops: Vec<BusOp>,
}

fn check(frame: Frame, next_seq: &mut BTreeMap<(NodeId, NodeId), u64>) {
    let channel = (frame.header.sender(), frame.header.recipient());
    let expected = next_seq.entry(channel).or_insert(0);
    assert_eq!(frame.header.seq(), *expected, "channel {channel:?} out of order");
    *expected += 1;
}

fuzz_target!(|schedule: Schedule| {
    let env = SimEnv::with_seed(schedule.seed);
    let mut bus = MessageBus::new(NODES, DeliveryOrder::Random);
    let mut next_seq: BTreeMap<(NodeId, NodeId), u64> = BTreeMap::new();
    let mut sent = 0u64;

    for op in schedule.ops.into_iter().take(512) {
        match op {
            BusOp::Send { from, to } => {
                let from = NodeId::from(from) % NODES as NodeId;
                let to = NodeId::from(to) % NODES as NodeId;
                let message = Message::new(from, LogicalClock::Scalar(sent), Payload::Reply);
                bus.send(to, message).expect("valid endpoints");
                sent += 1;
            }
            BusOp::Poll => {
                if let Some(frame) = bus.poll(&env) {
                    check(frame, &mut next_seq);
                }
            }
        }
    }

    while let Some(frame) = bus.poll(&env) {
        check(frame, &mut next_seq);
    }
    assert!(bus.is_idle());
    assert_eq!(bus.delivered(), sent);
});
