//! Chandy–Lamport global snapshots.
//!
//! The initiator records its state and sends a `MARKER` on every outgoing
//! channel. A node receiving its first marker of a round records its state,
//! considers that channel empty, and sends markers on all of its outgoing
//! channels, the one back to the sender included: that return marker is what
//! closes the sender's incoming channel from this node.
//! Until a marker arrives on channel `s -> self`, every DATA message from `s`
//! is logged as in transit. Correctness relies on per-channel FIFO delivery.

use std::collections::{BTreeMap, BTreeSet};

use cohort_proto::{MarkerBody, NodeId, Payload};
use serde::{Deserialize, Serialize};

use crate::{error::SnapshotError, state::ProcessState};

/// Per-round phase of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotPhase {
    /// No round started yet
    Idle,
    /// State recorded, waiting for markers
    Recording,
    /// Markers received from every neighbor
    Complete,
}

/// One node's contribution to a global snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    /// Recording node
    pub node: NodeId,
    /// Round
    pub round: u64,
    /// State at recording time
    pub state: ProcessState,
    /// DATA bodies in transit on each incoming channel, by sender
    pub channels: BTreeMap<NodeId, Vec<Vec<u8>>>,
}

/// Actions returned by the snapshot coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotAction {
    /// Send a marker
    Send {
        /// Recipient
        to: NodeId,
        /// Marker payload
        payload: Payload,
    },
    /// This node finished its part of the round
    Complete(LocalSnapshot),
}

/// Snapshot state for one node.
#[derive(Debug, Clone)]
pub struct SnapshotCoordinator {
    id: NodeId,
    neighbors: Vec<NodeId>,
    round: u64,
    phase: SnapshotPhase,
    local: Option<ProcessState>,
    markers: BTreeSet<NodeId>,
    channels: BTreeMap<NodeId, Vec<Vec<u8>>>,
    last_completed: Option<LocalSnapshot>,
}

impl SnapshotCoordinator {
    /// Coordinator for `id` with a fixed neighbor list.
    pub fn new(id: NodeId, neighbors: Vec<NodeId>) -> Self {
        Self {
            id,
            neighbors,
            round: 0,
            phase: SnapshotPhase::Idle,
            local: None,
            markers: BTreeSet::new(),
            channels: BTreeMap::new(),
            last_completed: None,
        }
    }

    /// Latest round this node has taken part in; 0 if none.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Phase of the latest round.
    pub fn phase(&self) -> SnapshotPhase {
        self.phase
    }

    /// True while waiting for markers.
    pub fn is_recording(&self) -> bool {
        self.phase == SnapshotPhase::Recording
    }

    /// State recorded for the current round.
    pub fn recorded_state(&self) -> Option<&ProcessState> {
        self.local.as_ref()
    }

    /// Most recent completed contribution.
    pub fn last_completed(&self) -> Option<&LocalSnapshot> {
        self.last_completed.as_ref()
    }

    /// Neighbors whose marker is still missing.
    pub fn missing_markers(&self) -> Vec<NodeId> {
        if !self.is_recording() {
            return Vec::new();
        }
        self.neighbors.iter().copied().filter(|n| !self.markers.contains(n)).collect()
    }

    /// Start round `round` at this node.
    ///
    /// # Errors
    ///
    /// - `InProgress` if this node is still recording
    /// - `StaleRound` if `round` does not advance past the latest round
    pub fn initiate(
        &mut self,
        round: u64,
        state: ProcessState,
    ) -> Result<Vec<SnapshotAction>, SnapshotError> {
        if self.is_recording() {
            return Err(SnapshotError::InProgress { round: self.round });
        }
        if round <= self.round {
            return Err(SnapshotError::StaleRound { round, current: self.round });
        }

        tracing::info!(node = self.id, round, "initiating snapshot");
        self.begin(round, state);
        let mut actions = self.markers();
        self.check_complete(&mut actions);
        Ok(actions)
    }

    /// Handle a marker from `from`. `state` is the node's current state, used
    /// if this is the first marker of the round.
    pub fn on_marker(&mut self, from: NodeId, round: u64, state: &ProcessState) -> Vec<SnapshotAction> {
        if !self.neighbors.contains(&from) {
            tracing::warn!(node = self.id, from, round, "ignoring marker from non-neighbor");
            return Vec::new();
        }
        if round < self.round {
            tracing::debug!(node = self.id, from, round, current = self.round, "stale marker");
            return Vec::new();
        }

        let mut actions = Vec::new();
        if round > self.round {
            if self.is_recording() {
                tracing::warn!(node = self.id, abandoned = self.round, round, "newer round preempts");
            }
            self.begin(round, state.clone());
            actions = self.markers();
        } else if !self.is_recording() {
            tracing::debug!(node = self.id, from, round, "marker after completion");
            return actions;
        }

        self.markers.insert(from);
        self.check_complete(&mut actions);
        actions
    }

    /// Handle application data from `from`. Logged if the channel is still
    /// being recorded.
    pub fn on_data(&mut self, from: NodeId, body: &[u8]) {
        if self.is_recording() && !self.markers.contains(&from) && self.neighbors.contains(&from) {
            self.channels.entry(from).or_default().push(body.to_vec());
        }
    }

    fn begin(&mut self, round: u64, state: ProcessState) {
        self.round = round;
        self.phase = SnapshotPhase::Recording;
        self.local = Some(state);
        self.markers.clear();
        self.channels = self.neighbors.iter().map(|n| (*n, Vec::new())).collect();
    }

    fn markers(&self) -> Vec<SnapshotAction> {
        let payload = Payload::Marker(MarkerBody { round: self.round });
        self.neighbors
            .iter()
            .map(|to| SnapshotAction::Send { to: *to, payload: payload.clone() })
            .collect()
    }

    fn check_complete(&mut self, actions: &mut Vec<SnapshotAction>) {
        if !self.is_recording() || self.markers.len() < self.neighbors.len() {
            return;
        }
        let Some(state) = self.local.clone() else {
            return;
        };
        self.phase = SnapshotPhase::Complete;
        let snapshot = LocalSnapshot {
            node: self.id,
            round: self.round,
            state,
            channels: std::mem::take(&mut self.channels),
        };
        tracing::info!(node = self.id, round = self.round, "local snapshot complete");
        self.last_completed = Some(snapshot.clone());
        actions.push(SnapshotAction::Complete(snapshot));
    }
}

/// Assembled snapshot of the whole network for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSnapshot {
    /// Round
    pub round: u64,
    /// Recorded state per node
    pub states: BTreeMap<NodeId, ProcessState>,
    /// DATA bodies in transit per channel `(from, to)`
    pub channels: BTreeMap<(NodeId, NodeId), Vec<Vec<u8>>>,
}

impl GlobalSnapshot {
    /// Assemble from every node's contribution to the same round.
    pub fn assemble(round: u64, locals: impl IntoIterator<Item = LocalSnapshot>) -> Self {
        let mut states = BTreeMap::new();
        let mut channels = BTreeMap::new();
        for local in locals {
            debug_assert_eq!(local.round, round);
            for (from, bodies) in local.channels {
                channels.insert((from, local.node), bodies);
            }
            states.insert(local.node, local.state);
        }
        Self { round, states, channels }
    }

    /// Check that the cut is consistent.
    ///
    /// For every recorded channel `i -> j`: `j` has not received more from
    /// `i` than `i` had sent, and the difference is exactly the number of
    /// messages logged on the channel.
    ///
    /// # Errors
    ///
    /// Description of the first violated channel.
    pub fn verify(&self) -> Result<(), String> {
        for (&(from, to), bodies) in &self.channels {
            let (Some(sender), Some(receiver)) = (self.states.get(&from), self.states.get(&to))
            else {
                return Err(format!("channel {from} -> {to} has no recorded endpoint"));
            };
            let sent = sender.sent_to(to);
            let received = receiver.received_from(from);
            if received > sent {
                return Err(format!(
                    "channel {from} -> {to}: received {received} but only {sent} sent"
                ));
            }
            if sent - received != bodies.len() as u64 {
                return Err(format!(
                    "channel {from} -> {to}: {} in transit, {} logged",
                    sent - received,
                    bodies.len()
                ));
            }
        }
        Ok(())
    }
}
