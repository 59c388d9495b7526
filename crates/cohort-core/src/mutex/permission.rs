//! Ricart–Agrawala permission voting.
//!
//! A requester broadcasts `REQUEST { stamp }` and enters once every other
//! node has replied. A node that is itself requesting (or inside the section)
//! with a smaller `(stamp, id)` defers its reply until it leaves. Equal stamps
//! break ties on the lower node id.

use std::collections::BTreeSet;

use cohort_proto::{NodeId, Payload, RequestBody};

use super::{MutexAction, MutexStatus, MutualExclusion};
use crate::error::MutexError;

/// Permission-voting coordinator for one node.
///
/// # Invariants
///
/// - `replies` only holds distinct peers other than `id`.
/// - `deferred` is non-empty only while a request is outstanding or granted.
#[derive(Debug, Clone)]
pub struct PermissionVoting {
    id: NodeId,
    node_count: usize,
    request: Option<(u64, NodeId)>,
    in_section: bool,
    replies: BTreeSet<NodeId>,
    deferred: BTreeSet<NodeId>,
}

impl PermissionVoting {
    /// Coordinator for `id` in a network of `node_count` nodes.
    pub fn new(id: NodeId, node_count: usize) -> Self {
        Self {
            id,
            node_count,
            request: None,
            in_section: false,
            replies: BTreeSet::new(),
            deferred: BTreeSet::new(),
        }
    }

    /// Outstanding `(stamp, id)`, if any.
    pub fn current_request(&self) -> Option<(u64, NodeId)> {
        self.request
    }

    /// Peers whose reply is being held back.
    pub fn deferred(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.deferred.iter().copied()
    }

    fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.node_count).filter_map(|p| NodeId::try_from(p).ok()).filter(|p| *p != self.id)
    }

    fn granted(&self) -> bool {
        self.replies.len() + 1 >= self.node_count
    }
}

impl MutualExclusion for PermissionVoting {
    fn request_access(&mut self, stamp: u64) -> Result<Vec<MutexAction>, MutexError> {
        if self.request.is_some() {
            return Err(MutexError::AlreadyRequesting(self.id));
        }
        self.request = Some((stamp, self.id));
        self.replies.clear();

        if self.granted() {
            self.in_section = true;
            return Ok(vec![MutexAction::Enter]);
        }

        tracing::debug!(node = self.id, stamp, "broadcasting request");
        let payload = Payload::Request(RequestBody { stamp });
        Ok(self.peers().map(|to| MutexAction::Send { to, payload: payload.clone() }).collect())
    }

    fn leave_critical_section(&mut self) -> Result<Vec<MutexAction>, MutexError> {
        if !self.in_section {
            return Err(MutexError::NotInCriticalSection(self.id));
        }
        self.in_section = false;
        self.request = None;
        self.replies.clear();

        let deferred = std::mem::take(&mut self.deferred);
        Ok(deferred.into_iter().map(|to| MutexAction::Send { to, payload: Payload::Reply }).collect())
    }

    fn handle(&mut self, from: NodeId, payload: &Payload) -> Result<Vec<MutexAction>, MutexError> {
        match payload {
            Payload::Request(RequestBody { stamp }) => {
                let theirs = (*stamp, from);
                let defer = self.request.is_some_and(|mine| mine < theirs);
                if defer {
                    tracing::debug!(node = self.id, from, stamp, "deferring reply");
                    self.deferred.insert(from);
                    Ok(Vec::new())
                } else {
                    Ok(vec![MutexAction::Send { to: from, payload: Payload::Reply }])
                }
            },
            Payload::Reply => {
                let waiting = self.request.is_some() && !self.in_section && from != self.id;
                if !waiting || !self.replies.insert(from) {
                    tracing::warn!(node = self.id, from, "ignoring stray reply");
                    return Err(MutexError::UnexpectedMessage { from, tag: payload.tag() });
                }
                if self.granted() {
                    self.in_section = true;
                    return Ok(vec![MutexAction::Enter]);
                }
                Ok(Vec::new())
            },
            other => Err(MutexError::UnexpectedMessage { from, tag: other.tag() }),
        }
    }

    fn status(&self) -> MutexStatus {
        match (self.request, self.in_section) {
            (_, true) => MutexStatus::InCriticalSection,
            (Some(_), false) => MutexStatus::Waiting,
            (None, false) => MutexStatus::Idle,
        }
    }

    fn waiting_on(&self) -> Vec<NodeId> {
        if self.status() != MutexStatus::Waiting {
            return Vec::new();
        }
        self.peers().filter(|p| !self.replies.contains(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use cohort_proto::Tag;

    use super::*;

    fn request(stamp: u64) -> Payload {
        Payload::Request(RequestBody { stamp })
    }

    fn reply_to(to: NodeId) -> MutexAction {
        MutexAction::Send { to, payload: Payload::Reply }
    }

    #[test]
    fn single_node_enters_immediately() {
        let mut solo = PermissionVoting::new(0, 1);
        assert_eq!(solo.request_access(5), Ok(vec![MutexAction::Enter]));
        assert_eq!(solo.status(), MutexStatus::InCriticalSection);
    }

    #[test]
    fn broadcasts_and_enters_after_all_replies() {
        let mut node = PermissionVoting::new(1, 3);
        let actions = node.request_access(4).expect("idle");
        assert_eq!(actions, vec![
            MutexAction::Send { to: 0, payload: request(4) },
            MutexAction::Send { to: 2, payload: request(4) },
        ]);

        assert!(node.handle(0, &Payload::Reply).expect("reply").is_empty());
        assert_eq!(node.waiting_on(), vec![2]);
        assert_eq!(node.handle(2, &Payload::Reply), Ok(vec![MutexAction::Enter]));
    }

    #[test]
    fn idle_node_replies_immediately() {
        let mut node = PermissionVoting::new(0, 3);
        assert_eq!(node.handle(2, &request(9)), Ok(vec![reply_to(2)]));
    }

    #[test]
    fn earlier_request_defers_later_one() {
        let mut node = PermissionVoting::new(0, 2);
        node.request_access(3).expect("idle");

        assert!(node.handle(1, &request(7)).expect("request").is_empty());
        assert_eq!(node.deferred().collect::<Vec<_>>(), vec![1]);

        node.handle(1, &Payload::Reply).expect("reply");
        assert_eq!(node.leave_critical_section(), Ok(vec![reply_to(1)]));
        assert_eq!(node.deferred().count(), 0);
    }

    #[test]
    fn equal_stamps_favor_lower_id() {
        let mut low = PermissionVoting::new(0, 2);
        let mut high = PermissionVoting::new(1, 2);
        low.request_access(2).expect("idle");
        high.request_access(2).expect("idle");

        assert!(low.handle(1, &request(2)).expect("request").is_empty());
        assert_eq!(high.handle(0, &request(2)), Ok(vec![reply_to(0)]));
    }

    #[test]
    fn later_request_yields_to_earlier_one() {
        let mut node = PermissionVoting::new(2, 3);
        node.request_access(10).expect("idle");
        assert_eq!(node.handle(0, &request(4)), Ok(vec![reply_to(0)]));
    }

    #[test]
    fn stray_and_duplicate_replies_are_rejected() {
        let mut node = PermissionVoting::new(0, 3);
        let stray = Err(MutexError::UnexpectedMessage { from: 1, tag: Tag::Reply });
        assert_eq!(node.handle(1, &Payload::Reply), stray);

        node.request_access(1).expect("idle");
        node.handle(1, &Payload::Reply).expect("first reply");
        assert_eq!(node.handle(1, &Payload::Reply), stray);
        assert_eq!(node.status(), MutexStatus::Waiting);
    }

    #[test]
    fn leave_only_flushes_deferred_replies() {
        let mut node = PermissionVoting::new(0, 3);
        node.request_access(1).expect("idle");
        node.handle(1, &Payload::Reply).expect("reply");
        node.handle(2, &Payload::Reply).expect("reply");
        assert_eq!(node.status(), MutexStatus::InCriticalSection);

        assert!(node.handle(2, &request(5)).expect("request").is_empty());
        assert_eq!(node.leave_critical_section(), Ok(vec![reply_to(2)]));
        assert_eq!(node.leave_critical_section(), Err(MutexError::NotInCriticalSection(0)));
    }
}
