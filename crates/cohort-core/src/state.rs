//! Application state captured by snapshots.

use std::{collections::BTreeMap, fmt};

use cohort_proto::NodeId;
use serde::{Deserialize, Serialize};

/// What a node's application has done so far.
///
/// The per-peer DATA counters are what makes a recorded cut checkable: in a
/// consistent cut no node has received more from a peer than that peer had
/// sent when it recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    /// Latest application label
    pub label: String,
    /// Local events recorded
    pub events: u64,
    /// DATA messages sent, per recipient
    pub sent: BTreeMap<NodeId, u64>,
    /// DATA messages received, per sender
    pub received: BTreeMap<NodeId, u64>,
}

impl ProcessState {
    /// Initial state of node `id`.
    pub fn new(id: NodeId) -> Self {
        Self { label: format!("initial state {id}"), ..Self::default() }
    }

    /// Record a local event.
    pub fn record_event(&mut self, label: impl Into<String>) {
        self.label = label.into();
        self.events += 1;
    }

    /// Record a DATA send to `to`.
    pub fn record_send(&mut self, to: NodeId) {
        *self.sent.entry(to).or_insert(0) += 1;
    }

    /// Record a DATA receipt from `from`.
    pub fn record_receive(&mut self, from: NodeId) {
        *self.received.entry(from).or_insert(0) += 1;
    }

    /// DATA messages sent to `to`.
    pub fn sent_to(&self, to: NodeId) -> u64 {
        self.sent.get(&to).copied().unwrap_or(0)
    }

    /// DATA messages received from `from`.
    pub fn received_from(&self, from: NodeId) -> u64 {
        self.received.get(&from).copied().unwrap_or(0)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} events)", self.label, self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_peers() {
        let mut state = ProcessState::new(1);
        state.record_send(2);
        state.record_send(2);
        state.record_receive(0);
        state.record_event("compute");

        assert_eq!(state.sent_to(2), 2);
        assert_eq!(state.sent_to(0), 0);
        assert_eq!(state.received_from(0), 1);
        assert_eq!(state.to_string(), "compute (1 events)");
    }
}
