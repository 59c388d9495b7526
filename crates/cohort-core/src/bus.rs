//! In-memory message bus with per-channel FIFO delivery.
//!
//! Every ordered pair `(from, to)` is a channel. Sending assigns the next
//! channel sequence number and encodes the message into a [`Frame`]; frames
//! then sit in an in-flight pool until the bus transmits them. Transmission
//! may pick frames in any order ([`DeliveryOrder::Random`]), so the receiving
//! side keeps a holdback buffer per channel and only releases frames to the
//! recipient's inbox in sequence order.

use std::collections::{BTreeMap, HashMap, VecDeque};

use cohort_proto::{Frame, Message, NodeId, ProtocolError};
use serde::{Deserialize, Serialize};

use crate::{env::Environment, error::BusError};

/// Which in-flight frame the bus transmits next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOrder {
    /// Oldest send first, across all channels.
    #[default]
    Fifo,
    /// Uniformly random in-flight frame, drawn from the environment.
    Random,
}

/// A decoded message together with its routing data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Receiving node
    pub recipient: NodeId,
    /// Sequence number on the `sender -> recipient` channel
    pub seq: u64,
    /// The message
    pub message: Message,
}

impl Envelope {
    /// Sending node.
    pub fn sender(&self) -> NodeId {
        self.message.sender
    }

    /// Encode for transport.
    ///
    /// # Errors
    ///
    /// - Any encoding error from [`Message::into_frame`]
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        self.message.into_frame(self.recipient, self.seq)
    }

    /// Decode a received frame.
    ///
    /// # Errors
    ///
    /// - Any decoding error from [`Message::from_frame`]
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        Ok(Self {
            recipient: frame.header.recipient(),
            seq: frame.header.seq(),
            message: Message::from_frame(frame)?,
        })
    }
}

/// Per-channel send counters. Owned by whoever originates messages: the bus
/// in the event-loop network, each actor in the actor runtime.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounters {
    next: HashMap<(NodeId, NodeId), u64>,
}

impl SequenceCounters {
    /// Create empty counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequence number on `from -> to`.
    pub fn assign(&mut self, from: NodeId, to: NodeId) -> u64 {
        let counter = self.next.entry((from, to)).or_insert(0);
        let seq = *counter;
        *counter += 1;
        seq
    }

    /// Messages sent so far on `from -> to`.
    pub fn sent(&self, from: NodeId, to: NodeId) -> u64 {
        self.next.get(&(from, to)).copied().unwrap_or(0)
    }
}

/// Receiver-side reordering buffer for one channel.
#[derive(Debug, Default)]
struct Holdback {
    next_expected: u64,
    pending: BTreeMap<u64, Frame>,
}

/// The message bus.
///
/// # Invariants
///
/// - Frames on a channel reach the recipient's inbox in sequence order, with
///   no gaps and no duplicates.
/// - A frame is in exactly one place: in flight, held back, or in an inbox.
#[derive(Debug)]
pub struct MessageBus {
    node_count: usize,
    order: DeliveryOrder,
    counters: SequenceCounters,
    in_flight: Vec<Frame>,
    holdback: HashMap<(NodeId, NodeId), Holdback>,
    inboxes: Vec<VecDeque<Frame>>,
    cursor: usize,
    delivered: u64,
}

impl MessageBus {
    /// Bus for `node_count` nodes.
    pub fn new(node_count: usize, order: DeliveryOrder) -> Self {
        Self {
            node_count,
            order,
            counters: SequenceCounters::new(),
            in_flight: Vec::new(),
            holdback: HashMap::new(),
            inboxes: (0..node_count).map(|_| VecDeque::new()).collect(),
            cursor: 0,
            delivered: 0,
        }
    }

    /// Number of addressable nodes.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Queue `message` for `recipient`. Returns the channel sequence number.
    ///
    /// # Errors
    ///
    /// - `InvalidAddress` if either endpoint is not a node; nothing is queued
    /// - `Protocol` if the message cannot be framed
    pub fn send(&mut self, recipient: NodeId, message: Message) -> Result<u64, BusError> {
        for node in [message.sender, recipient] {
            if node as usize >= self.node_count {
                tracing::warn!(
                    from = message.sender,
                    to = recipient,
                    tag = %message.tag(),
                    "dropping message with invalid address"
                );
                return Err(BusError::InvalidAddress {
                    recipient: node,
                    node_count: self.node_count,
                });
            }
        }

        let seq = self.counters.sent(message.sender, recipient);
        let frame = message.into_frame(recipient, seq)?;
        let assigned = self.counters.assign(message.sender, recipient);
        debug_assert_eq!(assigned, seq);

        tracing::trace!(from = message.sender, to = recipient, seq, tag = %message.tag(), "queued");
        self.in_flight.push(frame);
        Ok(seq)
    }

    /// Next frame to hand to a node, transmitting in-flight frames as needed.
    ///
    /// Inboxes are served round robin. Returns `None` once the bus is idle.
    pub fn poll<E: Environment>(&mut self, env: &E) -> Option<Frame> {
        loop {
            if let Some(frame) = self.pop_inbox() {
                self.delivered += 1;
                return Some(frame);
            }
            if !self.transmit(env) {
                return None;
            }
        }
    }

    /// Move one in-flight frame to its receiver's holdback buffer and release
    /// whatever became contiguous. Returns false if nothing was in flight.
    pub fn transmit<E: Environment>(&mut self, env: &E) -> bool {
        if self.in_flight.is_empty() {
            return false;
        }
        let index = match self.order {
            DeliveryOrder::Fifo => 0,
            DeliveryOrder::Random => {
                usize::try_from(env.random_below(self.in_flight.len() as u64)).unwrap_or(0)
            },
        };
        let frame = self.in_flight.remove(index);
        let sender = frame.header.sender();
        let recipient = frame.header.recipient();

        let buffer = self.holdback.entry((sender, recipient)).or_default();
        buffer.pending.insert(frame.header.seq(), frame);

        while let Some(next) = buffer.pending.remove(&buffer.next_expected) {
            buffer.next_expected += 1;
            if let Some(inbox) = self.inboxes.get_mut(recipient as usize) {
                inbox.push_back(next);
            }
        }
        true
    }

    /// True when nothing is in flight, held back or waiting in an inbox.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.inboxes.iter().all(VecDeque::is_empty)
    }

    /// Frames not yet handed to a node.
    pub fn pending(&self) -> usize {
        let held: usize = self.holdback.values().map(|h| h.pending.len()).sum();
        self.in_flight.len() + held + self.inboxes.iter().map(VecDeque::len).sum::<usize>()
    }

    /// Frames handed to nodes so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Messages sent so far on `from -> to`.
    pub fn sent_on(&self, from: NodeId, to: NodeId) -> u64 {
        self.counters.sent(from, to)
    }

    fn pop_inbox(&mut self) -> Option<Frame> {
        for offset in 0..self.node_count {
            let index = (self.cursor + offset) % self.node_count;
            if let Some(frame) = self.inboxes[index].pop_front() {
                self.cursor = (index + 1) % self.node_count;
                return Some(frame);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use cohort_proto::{LogicalClock, Payload};

    use super::*;
    use crate::env::SystemEnv;

    fn data(from: NodeId, n: u8) -> Message {
        Message::new(from, LogicalClock::Scalar(u64::from(n)), Payload::data(vec![n]))
    }

    #[test]
    fn assigns_per_channel_sequence_numbers() {
        let mut bus = MessageBus::new(3, DeliveryOrder::Fifo);
        assert_eq!(bus.send(1, data(0, 0)), Ok(0));
        assert_eq!(bus.send(1, data(0, 1)), Ok(1));
        assert_eq!(bus.send(2, data(0, 2)), Ok(0));
        assert_eq!(bus.send(0, data(1, 3)), Ok(0));
        assert_eq!(bus.sent_on(0, 1), 2);
    }

    #[test]
    fn invalid_recipient_changes_nothing() {
        let mut bus = MessageBus::new(2, DeliveryOrder::Fifo);
        let err = bus.send(5, data(0, 0)).unwrap_err();
        assert_eq!(err, BusError::InvalidAddress { recipient: 5, node_count: 2 });
        assert!(bus.is_idle());
        assert_eq!(bus.sent_on(0, 5), 0);
    }

    #[test]
    fn fifo_delivers_in_send_order() {
        let env = SystemEnv::new();
        let mut bus = MessageBus::new(2, DeliveryOrder::Fifo);
        for n in 0..5 {
            bus.send(1, data(0, n)).expect("valid address");
        }

        let seqs: Vec<u64> =
            std::iter::from_fn(|| bus.poll(&env)).map(|f| f.header.seq()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(bus.is_idle());
        assert_eq!(bus.delivered(), 5);
    }

    #[test]
    fn random_transport_still_delivers_each_channel_in_order() {
        let env = SystemEnv::new();
        let mut bus = MessageBus::new(3, DeliveryOrder::Random);
        for n in 0..20 {
            bus.send(2, data(0, n)).expect("valid address");
            bus.send(2, data(1, n)).expect("valid address");
        }

        let mut last: HashMap<NodeId, u64> = HashMap::new();
        let mut count = 0;
        while let Some(frame) = bus.poll(&env) {
            let sender = frame.header.sender();
            let seq = frame.header.seq();
            let expected = last.get(&sender).map_or(0, |s| s + 1);
            assert_eq!(seq, expected, "channel {sender} -> 2 out of order");
            last.insert(sender, seq);
            count += 1;
        }
        assert_eq!(count, 40);
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn envelope_frame_round_trip() {
        let envelope = Envelope { recipient: 3, seq: 7, message: data(1, 9) };
        let frame = envelope.to_frame().expect("encode");
        assert_eq!(Envelope::from_frame(&frame).expect("decode"), envelope);
        assert_eq!(envelope.sender(), 1);
    }
}
