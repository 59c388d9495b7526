//! Operations for randomized testing.
//!
//! Operations represent every externally driven action on a network. They
//! are generated by proptest (via `arbitrary`) and applied by a
//! [`super::Workload`]; node indices wrap modulo the network size so every
//! generated value targets a real node.

use arbitrary::Arbitrary;
use cohort_core::{GcError, MutexError, NetworkError, NodeError, SnapshotError, TerminationError};

/// Node index before wrapping (kept small so shrinking stays readable).
pub type NodeIndex = u8;

/// Operations that can be applied to a network.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Ask for the critical section.
    RequestMutex {
        /// Requesting node.
        node: NodeIndex,
    },

    /// Leave the critical section.
    ReleaseMutex {
        /// Releasing node.
        node: NodeIndex,
    },

    /// Send application data to a node.
    SendData {
        /// Sender.
        from: NodeIndex,
        /// Recipient (rejected unless a neighbor).
        to: NodeIndex,
        /// Body.
        body: SmallBody,
    },

    /// Record a local state change.
    LocalEvent {
        /// Node changing state.
        node: NodeIndex,
    },

    /// Start a snapshot round.
    TakeSnapshot {
        /// Initiator.
        initiator: NodeIndex,
    },

    /// Allocate a managed object.
    Allocate {
        /// Owning node.
        node: NodeIndex,
    },

    /// Release one of the node's live objects.
    ReleaseObject {
        /// Owning node.
        node: NodeIndex,
        /// Which live object, modulo the live count.
        pick: u8,
    },

    /// Run a collection cycle.
    Collect {
        /// Collecting node.
        node: NodeIndex,
    },

    /// Deliver up to `count` frames.
    Step {
        /// Frames to deliver.
        count: u8,
    },

    /// Deliver until the bus is idle.
    DeliverAll,
}

/// Small message body for testing.
///
/// Compact so generated cases shrink well; content is deterministic from
/// the seed.
#[derive(Debug, Clone, Arbitrary)]
pub struct SmallBody {
    /// Content seed.
    pub seed: u8,
    /// Length hint (0-3 maps to empty/small/medium/large).
    pub size_class: u8,
}

impl SmallBody {
    /// Expand to actual body bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = match self.size_class % 4 {
            0 => 0,
            1 => 8,
            2 => 64,
            _ => 256,
        };

        (0..len).map(|i| self.seed.wrapping_add(i as u8)).collect()
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation took effect.
    Ok,

    /// The network refused the operation as the protocol requires.
    Rejected(OperationError),
}

impl OperationResult {
    /// Check if operation took effect.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Check if operation was refused.
    pub fn is_rejected(&self) -> bool {
        !self.is_ok()
    }
}

/// Refusals that a correct network produces for ill-timed operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// A request is already outstanding.
    AlreadyRequesting,

    /// Release without holding the critical section.
    NotInCriticalSection,

    /// Data to a node that is not adjacent.
    NotNeighbor,

    /// A snapshot round is still being recorded.
    SnapshotInProgress,

    /// The arena has no room left.
    OutOfMemory,

    /// No live object to release.
    NothingToRelease,

    /// The node has no running work to hand out.
    NotActive,
}

impl OperationError {
    /// Classify a network error as an expected refusal.
    ///
    /// Returns `None` for errors a correct network never produces in
    /// response to a well-formed operation.
    pub fn classify(error: &NetworkError) -> Option<Self> {
        let NetworkError::Node { source, .. } = error else {
            return None;
        };
        match source {
            NodeError::Mutex(MutexError::AlreadyRequesting(_)) => Some(Self::AlreadyRequesting),
            NodeError::Mutex(MutexError::NotInCriticalSection(_)) => {
                Some(Self::NotInCriticalSection)
            },
            NodeError::NotNeighbor { .. } => Some(Self::NotNeighbor),
            NodeError::Snapshot(SnapshotError::InProgress { .. }) => Some(Self::SnapshotInProgress),
            NodeError::Gc(GcError::OutOfMemory { .. }) => Some(Self::OutOfMemory),
            NodeError::Termination(TerminationError::NotActive(_)) => Some(Self::NotActive),
            _ => None,
        }
    }
}
