//! Distributed mutual exclusion.
//!
//! Two interchangeable strategies behind the [`MutualExclusion`] trait:
//!
//! - [`TokenTree`]: Raymond's algorithm. A single token travels along a
//!   logical tree; holding it is the only grant.
//! - [`PermissionVoting`]: Ricart–Agrawala. A requester enters after every
//!   other node has replied; replies are deferred by nodes with an earlier
//!   `(stamp, id)`.
//!
//! Neither strategy blocks. A request returns immediately and entry is
//! reported later as [`MutexAction::Enter`], possibly while handling some
//! unrelated node's message.

mod permission;
mod token_tree;

use std::fmt;

use cohort_proto::{NodeId, Payload};
pub use permission::PermissionVoting;
use serde::{Deserialize, Serialize};
pub use token_tree::{TokenTree, tree_parent};

use crate::error::MutexError;

/// Actions returned by a mutual exclusion strategy for the node to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutexAction {
    /// Send a protocol message
    Send {
        /// Recipient
        to: NodeId,
        /// `Request`, `Reply` or `Token`
        payload: Payload,
    },
    /// The local request has been granted; the node is now in the critical
    /// section
    Enter,
}

/// Coarse protocol state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutexStatus {
    /// No outstanding request
    Idle,
    /// Request sent, not yet granted
    Waiting,
    /// Inside the critical section
    InCriticalSection,
}

/// Strategy selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutexStrategy {
    /// Ricart–Agrawala permission voting
    #[default]
    PermissionVoting,
    /// Raymond token tree with the token starting at `root`
    TokenTree {
        /// Initial token holder
        root: NodeId,
    },
}

impl MutexStrategy {
    /// Build the coordinator for node `id`.
    pub fn build(self, id: NodeId, node_count: usize) -> Box<dyn MutualExclusion> {
        match self {
            Self::PermissionVoting => Box::new(PermissionVoting::new(id, node_count)),
            Self::TokenTree { root } => Box::new(TokenTree::new(id, root, node_count)),
        }
    }
}

/// Mutual exclusion capability set.
///
/// # Invariants
///
/// - At most one node in the network is in the critical section.
/// - Every request is eventually granted, provided every node eventually
///   leaves the critical section and every message is delivered.
pub trait MutualExclusion: fmt::Debug + Send {
    /// Ask for the critical section. `stamp` orders competing requests for
    /// strategies that need it.
    ///
    /// # Errors
    ///
    /// - `AlreadyRequesting` if a request is outstanding or granted
    fn request_access(&mut self, stamp: u64) -> Result<Vec<MutexAction>, MutexError>;

    /// Leave the critical section and pass on the grant.
    ///
    /// # Errors
    ///
    /// - `NotInCriticalSection` if the node does not hold the grant
    fn leave_critical_section(&mut self) -> Result<Vec<MutexAction>, MutexError>;

    /// Handle a `REQUEST`, `REPLY` or `TOKEN` from `from`.
    ///
    /// # Errors
    ///
    /// - `UnexpectedMessage` if the payload is not valid in the current state
    fn handle(&mut self, from: NodeId, payload: &Payload) -> Result<Vec<MutexAction>, MutexError>;

    /// Current status.
    fn status(&self) -> MutexStatus;

    /// Nodes this node is waiting on while its request is outstanding.
    fn waiting_on(&self) -> Vec<NodeId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_start_idle() {
        for strategy in [MutexStrategy::PermissionVoting, MutexStrategy::TokenTree { root: 0 }] {
            let mutex = strategy.build(1, 3);
            assert_eq!(mutex.status(), MutexStatus::Idle);
            assert!(mutex.waiting_on().is_empty());
        }
    }
}
