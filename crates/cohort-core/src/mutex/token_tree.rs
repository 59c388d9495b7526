//! Raymond's tree-based token algorithm.
//!
//! Nodes form a binary-heap tree rooted at the initial token holder. Each
//! node only knows `holder`, the neighbor in the direction of the token (or
//! itself). Requests travel up toward the token; the token travels back down
//! along the same edges, one hop per grant.

use std::collections::VecDeque;

use cohort_proto::{NodeId, Payload, RequestBody};

use super::{MutexAction, MutexStatus, MutualExclusion};
use crate::error::MutexError;

/// Parent of `id` in the binary-heap tree rooted at `root`. `None` for the
/// root itself.
pub fn tree_parent(id: NodeId, root: NodeId, node_count: usize) -> Option<NodeId> {
    let n = node_count as u64;
    if n == 0 || id == root {
        return None;
    }
    let position = (u64::from(id) + n - u64::from(root) % n) % n;
    let parent_position = (position - 1) / 2;
    NodeId::try_from((parent_position + u64::from(root)) % n).ok()
}

/// Token-tree coordinator for one node.
///
/// # Invariants
///
/// - `holder == id` iff this node has the token.
/// - `using` implies `holder == id`.
/// - At most one `REQUEST` is outstanding toward `holder` (`asked`).
#[derive(Debug, Clone)]
pub struct TokenTree {
    id: NodeId,
    holder: NodeId,
    queue: VecDeque<NodeId>,
    asked: bool,
    using: bool,
}

impl TokenTree {
    /// Coordinator for `id`; the token starts at `root`.
    pub fn new(id: NodeId, root: NodeId, node_count: usize) -> Self {
        let holder = tree_parent(id, root, node_count).unwrap_or(id);
        Self { id, holder, queue: VecDeque::new(), asked: false, using: false }
    }

    /// Neighbor toward the token, or self.
    pub fn holder(&self) -> NodeId {
        self.holder
    }

    /// True if this node holds the token.
    pub fn has_token(&self) -> bool {
        self.holder == self.id
    }

    /// Pending requesters, head first.
    pub fn queue(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.queue.iter().copied()
    }

    fn assign_privilege(&mut self, actions: &mut Vec<MutexAction>) {
        if !self.has_token() || self.using {
            return;
        }
        let Some(head) = self.queue.pop_front() else {
            return;
        };
        self.asked = false;
        if head == self.id {
            self.using = true;
            actions.push(MutexAction::Enter);
        } else {
            tracing::debug!(node = self.id, to = head, "passing token");
            self.holder = head;
            actions.push(MutexAction::Send { to: head, payload: Payload::Token });
        }
    }

    fn make_request(&mut self, actions: &mut Vec<MutexAction>) {
        if self.has_token() || self.queue.is_empty() || self.asked {
            return;
        }
        self.asked = true;
        actions.push(MutexAction::Send {
            to: self.holder,
            payload: Payload::Request(RequestBody { stamp: 0 }),
        });
    }

    fn advance(&mut self) -> Vec<MutexAction> {
        let mut actions = Vec::new();
        self.assign_privilege(&mut actions);
        self.make_request(&mut actions);
        actions
    }
}

impl MutualExclusion for TokenTree {
    fn request_access(&mut self, _stamp: u64) -> Result<Vec<MutexAction>, MutexError> {
        if self.using || self.queue.contains(&self.id) {
            return Err(MutexError::AlreadyRequesting(self.id));
        }
        self.queue.push_back(self.id);
        Ok(self.advance())
    }

    fn leave_critical_section(&mut self) -> Result<Vec<MutexAction>, MutexError> {
        if !self.using {
            return Err(MutexError::NotInCriticalSection(self.id));
        }
        self.using = false;
        Ok(self.advance())
    }

    fn handle(&mut self, from: NodeId, payload: &Payload) -> Result<Vec<MutexAction>, MutexError> {
        match payload {
            Payload::Request(_) => {
                if !self.queue.contains(&from) {
                    self.queue.push_back(from);
                }
                Ok(self.advance())
            },
            Payload::Token if !self.has_token() => {
                self.holder = self.id;
                Ok(self.advance())
            },
            other => Err(MutexError::UnexpectedMessage { from, tag: other.tag() }),
        }
    }

    fn status(&self) -> MutexStatus {
        if self.using {
            MutexStatus::InCriticalSection
        } else if self.queue.contains(&self.id) {
            MutexStatus::Waiting
        } else {
            MutexStatus::Idle
        }
    }

    fn waiting_on(&self) -> Vec<NodeId> {
        if self.status() == MutexStatus::Waiting && !self.has_token() {
            vec![self.holder]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use cohort_proto::Tag;

    use super::*;

    fn request() -> Payload {
        Payload::Request(RequestBody { stamp: 0 })
    }

    #[test]
    fn heap_layout_around_root() {
        assert_eq!(tree_parent(0, 0, 7), None);
        assert_eq!(tree_parent(1, 0, 7), Some(0));
        assert_eq!(tree_parent(2, 0, 7), Some(0));
        assert_eq!(tree_parent(5, 0, 7), Some(2));

        // Rooted at 2: positions shift by the root.
        assert_eq!(tree_parent(3, 2, 4), Some(2));
        assert_eq!(tree_parent(1, 2, 4), Some(3));
    }

    #[test]
    fn root_enters_immediately() {
        let mut root = TokenTree::new(0, 0, 3);
        assert_eq!(root.request_access(0), Ok(vec![MutexAction::Enter]));
        assert_eq!(root.status(), MutexStatus::InCriticalSection);
    }

    #[test]
    fn request_travels_to_holder_and_token_comes_back() {
        let mut root = TokenTree::new(0, 0, 2);
        let mut leaf = TokenTree::new(1, 0, 2);

        let actions = leaf.request_access(0).expect("idle");
        assert_eq!(actions, vec![MutexAction::Send { to: 0, payload: request() }]);
        assert_eq!(leaf.waiting_on(), vec![0]);

        let actions = root.handle(1, &request()).expect("request");
        assert_eq!(actions, vec![MutexAction::Send { to: 1, payload: Payload::Token }]);
        assert_eq!(root.holder(), 1);

        let actions = leaf.handle(0, &Payload::Token).expect("token");
        assert_eq!(actions, vec![MutexAction::Enter]);
        assert!(leaf.has_token());
    }

    #[test]
    fn holder_in_section_queues_and_hands_over_on_leave() {
        let mut root = TokenTree::new(0, 0, 3);
        root.request_access(0).expect("idle");

        assert!(root.handle(2, &request()).expect("request").is_empty());
        assert!(root.handle(1, &request()).expect("request").is_empty());

        let actions = root.leave_critical_section().expect("in section");
        assert_eq!(actions, vec![
            MutexAction::Send { to: 2, payload: Payload::Token },
            MutexAction::Send { to: 2, payload: request() },
        ]);
        assert_eq!(root.queue().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn leave_with_empty_queue_retains_token() {
        let mut root = TokenTree::new(0, 0, 3);
        root.request_access(0).expect("idle");
        assert!(root.leave_critical_section().expect("in section").is_empty());
        assert!(root.has_token());
        assert_eq!(root.status(), MutexStatus::Idle);
    }

    #[test]
    fn protocol_errors() {
        let mut leaf = TokenTree::new(1, 0, 2);
        assert_eq!(leaf.leave_critical_section(), Err(MutexError::NotInCriticalSection(1)));

        leaf.request_access(0).expect("idle");
        assert_eq!(leaf.request_access(0), Err(MutexError::AlreadyRequesting(1)));

        let mut root = TokenTree::new(0, 0, 2);
        assert_eq!(
            root.handle(1, &Payload::Token),
            Err(MutexError::UnexpectedMessage { from: 1, tag: Tag::Token })
        );
        assert_eq!(
            root.handle(1, &Payload::Reply),
            Err(MutexError::UnexpectedMessage { from: 1, tag: Tag::Reply })
        );
    }
}
