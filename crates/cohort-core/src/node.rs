//! A single process.
//!
//! A [`Node`] owns one of each coordination component and is the only place
//! its clock is touched. Incoming messages go through a fixed pipeline:
//! channel sequence check, clock merge, then dispatch by tag. Outgoing
//! messages are stamped here, so every send is a clock event.

use std::collections::HashMap;

use cohort_proto::{ClockKind, Frame, LogicalClock, Message, NodeId, Payload};
use serde::{Deserialize, Serialize};

use crate::{
    bus::Envelope,
    clock::ClockService,
    error::NodeError,
    gc::{Address, CollectionReport, Collector, CollectorStrategy},
    mutex::{MutexAction, MutexStatus, MutexStrategy, MutualExclusion},
    snapshot::{LocalSnapshot, SnapshotAction, SnapshotCoordinator},
    state::ProcessState,
    termination::{TerminationAction, TerminationDetector},
};

/// Per-node component selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Clock representation
    pub clock: ClockKind,
    /// Mutual exclusion strategy
    pub mutex: MutexStrategy,
    /// Garbage collection strategy
    pub collector: CollectorStrategy,
    /// Node that detects global termination
    pub termination_root: NodeId,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            clock: ClockKind::Scalar,
            mutex: MutexStrategy::default(),
            collector: CollectorStrategy::default(),
            termination_root: 0,
        }
    }
}

/// Actions returned by a node for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// Deliver a stamped message
    Send {
        /// Recipient
        to: NodeId,
        /// Message, already stamped with this node's clock
        message: Message,
    },
    /// The node entered the critical section
    EnteredCriticalSection,
    /// The node left the critical section
    LeftCriticalSection,
    /// The node finished its part of a snapshot round
    SnapshotComplete(LocalSnapshot),
    /// The node observed global termination
    GlobalTermination,
}

/// One logical process.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    node_count: usize,
    neighbors: Vec<NodeId>,
    clock: ClockService,
    mutex: Box<dyn MutualExclusion>,
    snapshot: SnapshotCoordinator,
    termination: TerminationDetector,
    collector: Box<dyn Collector>,
    state: ProcessState,
    expected_seq: HashMap<NodeId, u64>,
}

impl Node {
    /// Create node `id` with a fixed neighbor list and an initial own clock
    /// component.
    pub fn new(
        id: NodeId,
        node_count: usize,
        neighbors: Vec<NodeId>,
        config: &NodeConfig,
        initial_clock: u64,
    ) -> Self {
        Self {
            id,
            node_count,
            clock: ClockService::with_initial(id, config.clock, node_count, initial_clock),
            mutex: config.mutex.build(id, node_count),
            snapshot: SnapshotCoordinator::new(id, neighbors.clone()),
            termination: TerminationDetector::new(id, config.termination_root),
            collector: config.collector.build(id),
            state: ProcessState::new(id),
            neighbors,
            expected_seq: HashMap::new(),
        }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Nodes in the network.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Fixed neighbor list.
    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    /// Current clock.
    pub fn clock(&self) -> &LogicalClock {
        self.clock.current()
    }

    /// Own clock component.
    pub fn own_time(&self) -> u64 {
        self.clock.own()
    }

    /// Application state.
    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    /// Mutual exclusion status.
    pub fn mutex_status(&self) -> MutexStatus {
        self.mutex.status()
    }

    /// Nodes this node's mutex request is waiting on.
    pub fn mutex_waiting_on(&self) -> Vec<NodeId> {
        self.mutex.waiting_on()
    }

    /// Snapshot state.
    pub fn snapshot(&self) -> &SnapshotCoordinator {
        &self.snapshot
    }

    /// Termination state.
    pub fn termination(&self) -> &TerminationDetector {
        &self.termination
    }

    /// Garbage collector.
    pub fn collector(&self) -> &dyn Collector {
        self.collector.as_ref()
    }

    /// Ask for the critical section. The request is a local event; its
    /// clock priority orders it against competing requests.
    ///
    /// # Errors
    ///
    /// - `Mutex(AlreadyRequesting)` if a request is outstanding
    pub fn request_mutex(&mut self) -> Result<Vec<NodeAction>, NodeError> {
        if self.mutex.status() != MutexStatus::Idle {
            return Err(crate::error::MutexError::AlreadyRequesting(self.id).into());
        }
        self.clock.tick();
        let stamp = self.clock.current().priority();
        tracing::debug!(node = self.id, stamp, "requesting critical section");
        let actions = self.mutex.request_access(stamp)?;
        Ok(self.mutex_actions(actions))
    }

    /// Leave the critical section.
    ///
    /// # Errors
    ///
    /// - `Mutex(NotInCriticalSection)` if the node does not hold it
    pub fn release_mutex(&mut self) -> Result<Vec<NodeAction>, NodeError> {
        let actions = self.mutex.leave_critical_section()?;
        self.clock.tick();
        tracing::debug!(node = self.id, "left critical section");
        let mut out = vec![NodeAction::LeftCriticalSection];
        out.extend(self.mutex_actions(actions));
        Ok(out)
    }

    /// Start snapshot round `round` here.
    ///
    /// # Errors
    ///
    /// - `Snapshot(InProgress | StaleRound)`
    pub fn initiate_snapshot(&mut self, round: u64) -> Result<Vec<NodeAction>, NodeError> {
        self.clock.tick();
        let actions = self.snapshot.initiate(round, self.state.clone())?;
        Ok(self.snapshot_actions(actions))
    }

    /// Send application data to a neighbor.
    ///
    /// # Errors
    ///
    /// - `NotNeighbor` if `to` is not adjacent; nothing is sent
    pub fn send_data(&mut self, to: NodeId, body: Vec<u8>) -> Result<Vec<NodeAction>, NodeError> {
        if !self.neighbors.contains(&to) {
            return Err(NodeError::NotNeighbor { node: self.id, peer: to });
        }
        self.state.record_send(to);
        Ok(vec![self.emit(to, Payload::data(body))])
    }

    /// Record a local application event.
    pub fn local_event(&mut self, label: impl Into<String>) {
        self.clock.tick();
        self.state.record_event(label);
    }

    /// Engage `target` in this node's work.
    ///
    /// # Errors
    ///
    /// - `Termination(NotActive)` if this node is passive
    pub fn activate(&mut self, target: NodeId) -> Result<Vec<NodeAction>, NodeError> {
        let actions = self.termination.activate(target)?;
        Ok(self.termination_actions(actions))
    }

    /// Begin spontaneous work.
    pub fn start_process(&mut self) {
        self.clock.tick();
        self.termination.start();
        self.state.record_event("started");
    }

    /// The local work is done.
    pub fn finish_process(&mut self) -> Vec<NodeAction> {
        self.clock.tick();
        self.state.record_event("finished");
        let actions = self.termination.finish();
        self.termination_actions(actions)
    }

    /// Allocate a managed object.
    ///
    /// # Errors
    ///
    /// - `Gc(OutOfMemory)` if the arena is exhausted
    pub fn allocate(&mut self, tag: impl Into<String>) -> Result<Address, NodeError> {
        Ok(self.collector.allocate(tag.into())?)
    }

    /// Drop the mutator's reference to the object at `address`.
    ///
    /// # Errors
    ///
    /// - `Gc(InvalidAddress)` if no live object is there
    pub fn release_object(&mut self, address: Address) -> Result<(), NodeError> {
        Ok(self.collector.release(address)?)
    }

    /// Run one collection cycle.
    pub fn collect_garbage(&mut self) -> CollectionReport {
        self.collector.collect()
    }

    /// Run the collector's most thorough cycle.
    pub fn collect_garbage_full(&mut self) -> CollectionReport {
        self.collector.collect_full()
    }

    /// Adopt a master time for the own clock component. Returns the
    /// adjustment applied.
    pub fn synchronize_clock(&mut self, master: u64) -> u64 {
        let adjustment = self.clock.synchronize(master);
        tracing::debug!(node = self.id, master, adjustment, "clock synchronized");
        adjustment
    }

    /// Handle an encoded frame from the transport.
    ///
    /// # Errors
    ///
    /// - `Misrouted` / `OutOfOrder` from the channel check
    /// - `Protocol` if the body cannot be decoded
    /// - Any error from [`Node::handle`]'s dispatch
    pub fn receive(&mut self, frame: &Frame) -> Result<Vec<NodeAction>, NodeError> {
        self.check_channel(frame.header.sender(), frame.header.recipient(), frame.header.seq())?;
        let envelope = Envelope::from_frame(frame)?;
        self.dispatch(envelope.message)
    }

    /// Handle a decoded envelope.
    ///
    /// # Errors
    ///
    /// - `Misrouted` / `OutOfOrder` from the channel check
    /// - `Clock(Mismatch)` if the timestamp cannot be merged
    /// - Component errors for messages the protocol state rejects
    pub fn handle(&mut self, envelope: Envelope) -> Result<Vec<NodeAction>, NodeError> {
        self.check_channel(envelope.sender(), envelope.recipient, envelope.seq)?;
        self.dispatch(envelope.message)
    }

    fn check_channel(&mut self, from: NodeId, recipient: NodeId, seq: u64) -> Result<(), NodeError> {
        if recipient != self.id {
            return Err(NodeError::Misrouted { node: self.id, recipient });
        }
        let expected = self.expected_seq.entry(from).or_insert(0);
        if seq < *expected {
            return Err(NodeError::OutOfOrder { node: self.id, from, expected: *expected, actual: seq });
        }
        *expected = seq + 1;
        Ok(())
    }

    fn dispatch(&mut self, message: Message) -> Result<Vec<NodeAction>, NodeError> {
        let from = message.sender;
        self.clock.update(&message.timestamp)?;
        tracing::trace!(node = self.id, from, tag = %message.tag(), clock = %self.clock.current(), "dispatch");

        match message.payload {
            payload @ (Payload::Request(_) | Payload::Reply | Payload::Token) => {
                let actions = self.mutex.handle(from, &payload)?;
                Ok(self.mutex_actions(actions))
            },
            Payload::Marker(marker) => {
                let actions = self.snapshot.on_marker(from, marker.round, &self.state);
                Ok(self.snapshot_actions(actions))
            },
            Payload::Terminate => {
                let actions = self.termination.on_terminate(from)?;
                Ok(self.termination_actions(actions))
            },
            Payload::Activate => {
                let actions = self.termination.on_activate(from);
                Ok(self.termination_actions(actions))
            },
            Payload::Data(data) => {
                self.snapshot.on_data(from, &data.body);
                self.state.record_receive(from);
                Ok(Vec::new())
            },
        }
    }

    fn emit(&mut self, to: NodeId, payload: Payload) -> NodeAction {
        let timestamp = self.clock.stamp();
        NodeAction::Send { to, message: Message::new(self.id, timestamp, payload) }
    }

    fn mutex_actions(&mut self, actions: Vec<MutexAction>) -> Vec<NodeAction> {
        actions
            .into_iter()
            .map(|action| match action {
                MutexAction::Send { to, payload } => self.emit(to, payload),
                MutexAction::Enter => {
                    tracing::info!(node = self.id, clock = %self.clock.current(), "entered critical section");
                    NodeAction::EnteredCriticalSection
                },
            })
            .collect()
    }

    fn snapshot_actions(&mut self, actions: Vec<SnapshotAction>) -> Vec<NodeAction> {
        actions
            .into_iter()
            .map(|action| match action {
                SnapshotAction::Send { to, payload } => self.emit(to, payload),
                SnapshotAction::Complete(local) => NodeAction::SnapshotComplete(local),
            })
            .collect()
    }

    fn termination_actions(&mut self, actions: Vec<TerminationAction>) -> Vec<NodeAction> {
        actions
            .into_iter()
            .map(|action| match action {
                TerminationAction::Send { to, payload } => self.emit(to, payload),
                TerminationAction::GlobalTermination => NodeAction::GlobalTermination,
            })
            .collect()
    }
}
