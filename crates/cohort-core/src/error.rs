//! Error types for the coordination core.
//!
//! One enum per component, wrapped by [`NodeError`] at the node boundary and
//! by [`NetworkError`] at the driver boundary. A `NodeError` is always scoped
//! to a single message or operation: the node that produced it stays usable.

use cohort_proto::{NodeId, ProtocolError, Tag};
use thiserror::Error;

use crate::{gc::Address, network::StallReport};

/// Clock merge failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    /// Incoming timestamp has a different representation or length
    #[error("clock mismatch: local clock is {expected}, incoming timestamp is {actual}")]
    Mismatch {
        /// Local clock shape
        expected: String,
        /// Incoming timestamp shape
        actual: String,
    },
}

/// Message bus failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Recipient is not a node of this network
    #[error("invalid address: node {recipient} does not exist (network has {node_count} nodes)")]
    InvalidAddress {
        /// Requested recipient
        recipient: NodeId,
        /// Nodes in the network
        node_count: usize,
    },

    /// Message could not be framed
    #[error("framing failed: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Mutual exclusion failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutexError {
    /// A request is already outstanding or the node is inside the section
    #[error("node {0} is already requesting the critical section")]
    AlreadyRequesting(NodeId),

    /// Leave called while not holding the critical section
    #[error("node {0} is not in the critical section")]
    NotInCriticalSection(NodeId),

    /// Message that the protocol state does not allow
    #[error("unexpected {tag} from node {from}")]
    UnexpectedMessage {
        /// Sender
        from: NodeId,
        /// Offending tag
        tag: Tag,
    },
}

/// Snapshot failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// A round is still being recorded somewhere in the network
    #[error("snapshot round {round} is still in progress")]
    InProgress {
        /// Round still recording
        round: u64,
    },

    /// Round number does not advance past the last one started
    #[error("stale snapshot round {round}: last started round is {current}")]
    StaleRound {
        /// Requested round
        round: u64,
        /// Latest round this node knows about
        current: u64,
    },

    /// No round has completed yet
    #[error("no completed snapshot")]
    NoSnapshot,
}

/// Termination detection failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminationError {
    /// `TERMINATE` from a node with no outstanding activation
    #[error("node {node} received TERMINATE from {child}, which it never activated")]
    UnknownChild {
        /// Receiving node
        node: NodeId,
        /// Reported child
        child: NodeId,
    },

    /// Activation attempted by a passive node
    #[error("node {0} is not active and cannot activate others")]
    NotActive(NodeId),
}

/// Garbage collector failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GcError {
    /// Arena is full even after a collection
    #[error("out of memory: {live} live objects fill an arena of {capacity} slots")]
    OutOfMemory {
        /// Arena capacity
        capacity: usize,
        /// Live objects after the collection
        live: usize,
    },

    /// Address does not name a live object
    #[error("no live object at address {0}")]
    InvalidAddress(Address),
}

/// Topology validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// Adjacency list count differs from node count
    #[error("topology describes {actual} nodes, network has {expected}")]
    WrongSize {
        /// Nodes in the network
        expected: usize,
        /// Adjacency lists given
        actual: usize,
    },

    /// Neighbor id out of range
    #[error("node {node} lists unknown neighbor {neighbor}")]
    UnknownNeighbor {
        /// Listing node
        node: NodeId,
        /// Listed neighbor
        neighbor: NodeId,
    },

    /// Node lists itself
    #[error("node {0} lists itself as a neighbor")]
    SelfLoop(NodeId),

    /// `a` lists `b` but not the reverse
    #[error("edge {a} -> {b} has no reverse edge")]
    Asymmetric {
        /// Listing node
        a: NodeId,
        /// Listed node
        b: NodeId,
    },

    /// Some node cannot be reached from node 0
    #[error("topology is disconnected: node {0} is unreachable")]
    Disconnected(NodeId),

    /// Star center out of range
    #[error("star center {center} out of range for {node_count} nodes")]
    InvalidCenter {
        /// Requested center
        center: NodeId,
        /// Nodes in the network
        node_count: usize,
    },
}

/// Per-node failures. Scoped to the message or operation that caused them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Frame could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Timestamp could not be merged
    #[error("clock error: {0}")]
    Clock(#[from] ClockError),

    /// Outbound message could not be queued
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Mutual exclusion protocol error
    #[error("mutex error: {0}")]
    Mutex(#[from] MutexError),

    /// Snapshot protocol error
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Termination protocol error
    #[error("termination error: {0}")]
    Termination(#[from] TerminationError),

    /// Collector error
    #[error("gc error: {0}")]
    Gc(#[from] GcError),

    /// Envelope addressed to a different node
    #[error("node {node} received an envelope addressed to {recipient}")]
    Misrouted {
        /// Receiving node
        node: NodeId,
        /// Envelope recipient
        recipient: NodeId,
    },

    /// Channel sequence number went backwards
    #[error("out of order on channel {from} -> {node}: expected seq >= {expected}, got {actual}")]
    OutOfOrder {
        /// Receiving node
        node: NodeId,
        /// Sending node
        from: NodeId,
        /// Lowest acceptable sequence number
        expected: u64,
        /// Received sequence number
        actual: u64,
    },

    /// Application data addressed to a non-neighbor
    #[error("node {peer} is not a neighbor of node {node}")]
    NotNeighbor {
        /// Sending node
        node: NodeId,
        /// Intended recipient
        peer: NodeId,
    },
}

impl NodeError {
    /// Returns true if the error means an incoming message was discarded
    /// without affecting node state.
    ///
    /// Operation errors (a bad `release_mutex`, an exhausted arena) are not
    /// dropped messages: they are returned to the caller that invoked the
    /// operation.
    pub fn is_dropped_message(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_)
                | Self::Clock(_)
                | Self::Misrouted { .. }
                | Self::OutOfOrder { .. }
                | Self::Mutex(MutexError::UnexpectedMessage { .. })
                | Self::Termination(TerminationError::UnknownChild { .. })
        )
    }
}

/// Driver-level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Network configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Topology rejected
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Operation addressed a node that does not exist
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Node operation failed
    #[error("node {node}: {source}")]
    Node {
        /// Node that failed
        node: NodeId,
        /// Underlying failure
        #[source]
        source: NodeError,
    },

    /// Node task is no longer running
    #[error("node {0} has stopped")]
    ActorStopped(NodeId),

    /// Step budget exhausted before the condition held
    #[error("stalled after {steps} steps: {report}")]
    Stalled {
        /// Steps executed
        steps: usize,
        /// Who was waiting on what
        report: StallReport,
    },
}

impl NetworkError {
    /// Wrap a node error with the node it came from.
    pub fn node(node: NodeId, source: impl Into<NodeError>) -> Self {
        Self::Node { node, source: source.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_input_is_a_dropped_message() {
        assert!(NodeError::Protocol(ProtocolError::UnknownTag(0x44)).is_dropped_message());
        assert!(
            NodeError::Clock(ClockError::Mismatch {
                expected: "scalar".to_string(),
                actual: "vector[2]".to_string(),
            })
            .is_dropped_message()
        );
        assert!(
            NodeError::Termination(TerminationError::UnknownChild { node: 0, child: 3 })
                .is_dropped_message()
        );
    }

    #[test]
    fn operation_errors_are_not_dropped_messages() {
        assert!(!NodeError::Mutex(MutexError::NotInCriticalSection(1)).is_dropped_message());
        assert!(
            !NodeError::Gc(GcError::OutOfMemory { capacity: 4, live: 4 }).is_dropped_message()
        );
        assert!(!NodeError::NotNeighbor { node: 0, peer: 2 }.is_dropped_message());
    }

    #[test]
    fn network_error_names_the_node() {
        let err = NetworkError::node(2, MutexError::AlreadyRequesting(2));
        assert_eq!(
            err.to_string(),
            "node 2: mutex error: node 2 is already requesting the critical section"
        );
    }
}
