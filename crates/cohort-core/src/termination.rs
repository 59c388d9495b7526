//! Dijkstra–Scholten termination detection.
//!
//! Activations build a tree: a passive, unparented node adopts the first node
//! that activates it as its parent. Every other activation is acknowledged
//! at once with `TERMINATE`. A node tracks a deficit per child (activations
//! not yet acknowledged) and reports to its parent once it is passive with no
//! deficit left. When the designated root reaches that state, the whole
//! computation has terminated.

use std::collections::BTreeMap;

use cohort_proto::{NodeId, Payload};

use crate::error::TerminationError;

/// Actions returned by the termination detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationAction {
    /// Send `ACTIVATE` or `TERMINATE`
    Send {
        /// Recipient
        to: NodeId,
        /// Activation or termination payload
        payload: Payload,
    },
    /// The root observed global termination
    GlobalTermination,
}

/// Termination state for one node.
///
/// # Invariants
///
/// - A child appears in `deficits` only with a positive count.
/// - The root never has a parent.
/// - `GlobalTermination` is emitted at most once.
#[derive(Debug, Clone)]
pub struct TerminationDetector {
    id: NodeId,
    root: NodeId,
    parent: Option<NodeId>,
    deficits: BTreeMap<NodeId, u64>,
    active: bool,
    started: bool,
    signalled: bool,
}

impl TerminationDetector {
    /// Detector for `id`; `root` is the node that detects global termination.
    pub fn new(id: NodeId, root: NodeId) -> Self {
        Self {
            id,
            root,
            parent: None,
            deficits: BTreeMap::new(),
            active: false,
            started: false,
            signalled: false,
        }
    }

    /// True if this node is the detecting root.
    pub fn is_root(&self) -> bool {
        self.id == self.root
    }

    /// Current parent in the activation tree.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// True while the node has work of its own.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Outstanding activations per child.
    pub fn deficits(&self) -> &BTreeMap<NodeId, u64> {
        &self.deficits
    }

    /// True once global termination has been signalled.
    pub fn has_signalled(&self) -> bool {
        self.signalled
    }

    /// True if the node is part of an activation tree.
    pub fn is_engaged(&self) -> bool {
        self.active || self.parent.is_some() || !self.deficits.is_empty()
    }

    /// Begin spontaneous work. The root starts the computation this way;
    /// any other node becomes the root of its own tree.
    pub fn start(&mut self) {
        self.active = true;
        if self.is_root() {
            self.started = true;
        }
    }

    /// Engage `target` in this node's work.
    ///
    /// # Errors
    ///
    /// - `NotActive` if this node is passive
    pub fn activate(&mut self, target: NodeId) -> Result<Vec<TerminationAction>, TerminationError> {
        if !self.active {
            return Err(TerminationError::NotActive(self.id));
        }
        *self.deficits.entry(target).or_insert(0) += 1;
        Ok(vec![TerminationAction::Send { to: target, payload: Payload::Activate }])
    }

    /// Handle `ACTIVATE` from `from`.
    pub fn on_activate(&mut self, from: NodeId) -> Vec<TerminationAction> {
        if self.is_engaged() || self.is_root() {
            self.active = true;
            tracing::debug!(node = self.id, from, "already engaged, acknowledging");
            return vec![TerminationAction::Send { to: from, payload: Payload::Terminate }];
        }
        tracing::debug!(node = self.id, parent = from, "joined activation tree");
        self.parent = Some(from);
        self.active = true;
        Vec::new()
    }

    /// The local work is done.
    pub fn finish(&mut self) -> Vec<TerminationAction> {
        self.active = false;
        self.evaluate()
    }

    /// Handle `TERMINATE` from `from`.
    ///
    /// # Errors
    ///
    /// - `UnknownChild` if `from` has no outstanding activation
    pub fn on_terminate(&mut self, from: NodeId) -> Result<Vec<TerminationAction>, TerminationError> {
        let Some(deficit) = self.deficits.get_mut(&from) else {
            return Err(TerminationError::UnknownChild { node: self.id, child: from });
        };
        *deficit -= 1;
        if *deficit == 0 {
            self.deficits.remove(&from);
        }
        Ok(self.evaluate())
    }

    fn evaluate(&mut self) -> Vec<TerminationAction> {
        if self.active || !self.deficits.is_empty() {
            return Vec::new();
        }
        if let Some(parent) = self.parent.take() {
            tracing::debug!(node = self.id, parent, "detaching from activation tree");
            return vec![TerminationAction::Send { to: parent, payload: Payload::Terminate }];
        }
        if self.is_root() && self.started && !self.signalled {
            self.signalled = true;
            tracing::info!(node = self.id, "global termination detected");
            return vec![TerminationAction::GlobalTermination];
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(to: NodeId, payload: Payload) -> TerminationAction {
        TerminationAction::Send { to, payload }
    }

    #[test]
    fn two_level_tree_terminates_once() {
        let mut root = TerminationDetector::new(0, 0);
        let mut child = TerminationDetector::new(1, 0);
        root.start();

        assert_eq!(root.activate(1), Ok(vec![send(1, Payload::Activate)]));
        assert!(child.on_activate(0).is_empty());
        assert_eq!(child.parent(), Some(0));

        assert!(root.finish().is_empty(), "child still owes a TERMINATE");
        assert_eq!(child.finish(), vec![send(0, Payload::Terminate)]);
        assert_eq!(child.parent(), None);

        assert_eq!(root.on_terminate(1), Ok(vec![TerminationAction::GlobalTermination]));
        assert!(root.finish().is_empty());
        assert!(root.has_signalled());
    }

    #[test]
    fn engaged_node_acknowledges_immediately() {
        let mut node = TerminationDetector::new(2, 0);
        node.on_activate(0);
        assert_eq!(node.on_activate(1), vec![send(1, Payload::Terminate)]);
        assert_eq!(node.parent(), Some(0));
    }

    #[test]
    fn root_never_adopts_a_parent() {
        let mut root = TerminationDetector::new(0, 0);
        assert_eq!(root.on_activate(3), vec![send(3, Payload::Terminate)]);
        assert_eq!(root.parent(), None);
        assert!(root.is_active());
    }

    #[test]
    fn deficit_counts_repeated_activations() {
        let mut root = TerminationDetector::new(0, 0);
        root.start();
        root.activate(1).expect("active");
        root.activate(1).expect("active");
        root.finish();

        assert!(root.on_terminate(1).expect("known child").is_empty());
        assert_eq!(root.on_terminate(1), Ok(vec![TerminationAction::GlobalTermination]));
    }

    #[test]
    fn unknown_child_is_an_error() {
        let mut root = TerminationDetector::new(0, 0);
        assert_eq!(root.on_terminate(4), Err(TerminationError::UnknownChild { node: 0, child: 4 }));
    }

    #[test]
    fn passive_node_cannot_activate() {
        let mut node = TerminationDetector::new(1, 0);
        assert_eq!(node.activate(2), Err(TerminationError::NotActive(1)));
    }

    #[test]
    fn detached_node_can_join_a_new_tree() {
        let mut node = TerminationDetector::new(1, 0);
        node.on_activate(0);
        node.finish();
        assert!(!node.is_engaged());

        assert!(node.on_activate(2).is_empty());
        assert_eq!(node.parent(), Some(2));
    }

    #[test]
    fn unstarted_root_does_not_signal() {
        let mut root = TerminationDetector::new(0, 0);
        assert!(root.finish().is_empty());
        assert!(!root.has_signalled());
    }
}
