//! Property-based tests for the message bus.
//!
//! The transport schedule is drawn by proptest and replayed through a
//! scripted environment, so a failing schedule shrinks to a minimal one.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use cohort_core::{DeliveryOrder, Environment, LogicalClock, Message, MessageBus, NodeId, Payload};
use proptest::prelude::*;

/// Replays a fixed list of values, cycling when it runs out.
#[derive(Clone)]
struct ScriptedEnv {
    values: Arc<Vec<u64>>,
    cursor: Arc<AtomicUsize>,
}

impl ScriptedEnv {
    fn new(values: Vec<u64>) -> Self {
        Self { values: Arc::new(values), cursor: Arc::new(AtomicUsize::new(0)) }
    }
}

impl Environment for ScriptedEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        let value = self.random_u64().to_be_bytes();
        for (dst, src) in buffer.iter_mut().zip(value.iter().cycle()) {
            *dst = *src;
        }
    }

    fn random_u64(&self) -> u64 {
        if self.values.is_empty() {
            return 0;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.values.len();
        self.values[index]
    }
}

fn send_strategy(nodes: u32) -> impl Strategy<Value = Vec<(NodeId, NodeId)>> {
    prop::collection::vec((0..nodes, 0..nodes), 1..60)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: under any transport schedule every channel delivers its
    /// frames exactly once and in send order
    #[test]
    fn prop_random_schedule_preserves_channel_order(
        sends in send_strategy(4),
        schedule in prop::collection::vec(any::<u64>(), 0..64),
    ) {
        let env = ScriptedEnv::new(schedule);
        let mut bus = MessageBus::new(4, DeliveryOrder::Random);

        let mut expected: HashMap<(NodeId, NodeId), u64> = HashMap::new();
        for (i, (from, to)) in sends.iter().copied().enumerate() {
            let message = Message::new(from, LogicalClock::Scalar(i as u64), Payload::data(vec![]));
            let seq = bus.send(to, message).expect("valid address");
            let counter = expected.entry((from, to)).or_insert(0);
            prop_assert_eq!(seq, *counter);
            *counter += 1;
        }

        let mut next: HashMap<(NodeId, NodeId), u64> = HashMap::new();
        let mut delivered = 0usize;
        while let Some(frame) = bus.poll(&env) {
            let channel = (frame.header.sender(), frame.header.recipient());
            let slot = next.entry(channel).or_insert(0);
            prop_assert_eq!(frame.header.seq(), *slot, "channel {:?} out of order", channel);
            *slot += 1;
            delivered += 1;
        }

        prop_assert_eq!(delivered, sends.len());
        prop_assert_eq!(next, expected);
        prop_assert!(bus.is_idle());
        prop_assert_eq!(bus.pending(), 0);
    }

    /// Property: a send to a node outside the bus is refused and leaves no trace
    #[test]
    fn prop_invalid_address_is_rejected(from in 0u32..3, to in 3u32..64) {
        let mut bus = MessageBus::new(3, DeliveryOrder::Fifo);
        let message = Message::new(from, LogicalClock::Scalar(0), Payload::Reply);

        prop_assert!(bus.send(to, message).is_err());
        prop_assert!(bus.is_idle());
        prop_assert_eq!(bus.sent_on(from, to), 0);
    }
}
