//! Deterministic single-threaded network of nodes.
//!
//! The [`Network`] owns every [`Node`] and the [`MessageBus`] between them.
//! Operations invoke a node and then execute the returned [`NodeAction`]s:
//! sends go onto the bus, everything else is recorded (critical section
//! entries, completed snapshots, termination). [`Network::step`] delivers one
//! frame to one node. Nothing ever blocks; a protocol that cannot make
//! progress shows up as an idle bus with unmet goals, reported by
//! [`Network::stall_report`].

use std::{collections::BTreeMap, fmt};

use cohort_proto::{ClockKind, LogicalClock, NodeId};
use serde::{Deserialize, Serialize};

use crate::{
    bus::{DeliveryOrder, MessageBus},
    clock::{SyncPolicy, master_time},
    env::{Environment, SystemEnv},
    error::{NetworkError, NodeError, SnapshotError},
    gc::{Address, CollectionReport, CollectorStrategy},
    mutex::{MutexStatus, MutexStrategy},
    node::{Node, NodeAction, NodeConfig},
    snapshot::{GlobalSnapshot, LocalSnapshot},
    topology::Topology,
};

/// Initial value of each node's own clock component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitialClock {
    /// All clocks start at zero
    #[default]
    Zero,
    /// All clocks start at the same value
    Fixed(u64),
    /// Each clock starts uniformly in `0..=max`, drawn from the environment
    Random {
        /// Largest initial value
        max: u64,
    },
}

/// Network configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Clock representation
    pub clock: ClockKind,
    /// Initial clock values
    pub initial_clock: InitialClock,
    /// How `start` synchronizes clocks
    pub sync: SyncPolicy,
    /// Mutual exclusion strategy
    pub mutex: MutexStrategy,
    /// Garbage collection strategy
    pub collector: CollectorStrategy,
    /// Transport order
    pub delivery: DeliveryOrder,
    /// Node that detects global termination
    pub termination_root: NodeId,
    /// Steps `run_until*` may take before reporting a stall
    pub step_budget: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            clock: ClockKind::Scalar,
            initial_clock: InitialClock::Zero,
            sync: SyncPolicy::Average,
            mutex: MutexStrategy::PermissionVoting,
            collector: CollectorStrategy::default(),
            delivery: DeliveryOrder::Fifo,
            termination_root: 0,
            step_budget: 100_000,
        }
    }
}

impl NetworkConfig {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            clock: self.clock,
            mutex: self.mutex,
            collector: self.collector,
            termination_root: self.termination_root,
        }
    }
}

/// One critical section interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalSectionEntry {
    /// Node that held the section
    pub node: NodeId,
    /// Network step at entry
    pub entered_at: u64,
    /// Network step at exit, `None` while held
    pub left_at: Option<u64>,
    /// Node clock at entry
    pub clock: LogicalClock,
}

/// When and where global termination was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationRecord {
    /// Detecting node
    pub node: NodeId,
    /// Network step of detection
    pub step: u64,
    /// Times termination was signalled; more than one is a protocol bug
    pub signals: u32,
}

/// A message the network discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedMessage {
    /// Receiving node
    pub node: NodeId,
    /// Why it was discarded
    pub error: NodeError,
}

/// Who is waiting on what when the network stops making progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StallReport {
    /// Frames not yet handed to a node
    pub pending_messages: usize,
    /// Mutex requesters and the nodes they are waiting on
    pub mutex_waiting: Vec<(NodeId, Vec<NodeId>)>,
    /// Recording nodes and the neighbors whose marker is missing
    pub snapshot_waiting: Vec<(NodeId, Vec<NodeId>)>,
    /// Nodes still engaged in the termination tree
    pub engaged: Vec<NodeId>,
}

impl StallReport {
    /// True if nothing is waiting on anything.
    pub fn is_clear(&self) -> bool {
        self.pending_messages == 0
            && self.mutex_waiting.is_empty()
            && self.snapshot_waiting.is_empty()
            && self.engaged.is_empty()
    }
}

impl fmt::Display for StallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pending", self.pending_messages)?;
        for (node, peers) in &self.mutex_waiting {
            write!(f, "; node {node} awaits grant from {peers:?}")?;
        }
        for (node, peers) in &self.snapshot_waiting {
            write!(f, "; node {node} awaits markers from {peers:?}")?;
        }
        if !self.engaged.is_empty() {
            write!(f, "; engaged {:?}", self.engaged)?;
        }
        Ok(())
    }
}

/// The simulated network.
#[derive(Debug)]
pub struct Network<E: Environment = SystemEnv> {
    config: NetworkConfig,
    env: E,
    nodes: Vec<Node>,
    bus: MessageBus,
    steps: u64,
    started: bool,
    latest_round: u64,
    entries: Vec<CriticalSectionEntry>,
    snapshots: BTreeMap<u64, BTreeMap<NodeId, LocalSnapshot>>,
    termination: Option<TerminationRecord>,
    dropped: Vec<DroppedMessage>,
}

impl Network<SystemEnv> {
    /// Network of `node_count` nodes with the default configuration.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` for an empty network
    /// - `Topology` if the topology is invalid for `node_count`
    pub fn setup(node_count: usize, topology: Topology) -> Result<Self, NetworkError> {
        Self::with_config(node_count, topology, NetworkConfig::default(), SystemEnv::new())
    }
}

impl<E: Environment> Network<E> {
    /// Network with an explicit configuration and environment.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` for an empty network or out-of-range root nodes
    /// - `Topology` if the topology is invalid for `node_count`
    pub fn with_config(
        node_count: usize,
        topology: Topology,
        config: NetworkConfig,
        env: E,
    ) -> Result<Self, NetworkError> {
        if node_count == 0 || NodeId::try_from(node_count).is_err() {
            return Err(NetworkError::InvalidConfig(format!("unsupported node count {node_count}")));
        }
        if config.termination_root as usize >= node_count {
            return Err(NetworkError::InvalidConfig(format!(
                "termination root {} out of range",
                config.termination_root
            )));
        }
        if let MutexStrategy::TokenTree { root } = config.mutex {
            if root as usize >= node_count {
                return Err(NetworkError::InvalidConfig(format!("token root {root} out of range")));
            }
        }

        let adjacency = topology.neighbors(node_count)?;
        let node_config = config.node_config();
        let nodes = adjacency
            .into_iter()
            .zip(0..)
            .map(|(neighbors, id)| {
                let initial = match config.initial_clock {
                    InitialClock::Zero => 0,
                    InitialClock::Fixed(value) => value,
                    InitialClock::Random { max } => env.random_below(max.saturating_add(1)),
                };
                Node::new(id, node_count, neighbors, &node_config, initial)
            })
            .collect();

        tracing::info!(node_count, ?topology, mutex = ?config.mutex, clock = ?config.clock, "network created");

        Ok(Self {
            bus: MessageBus::new(node_count, config.delivery),
            config,
            env,
            nodes,
            steps: 0,
            started: false,
            latest_round: 0,
            entries: Vec::new(),
            snapshots: BTreeMap::new(),
            termination: None,
            dropped: Vec::new(),
        })
    }

    /// Synchronize clocks and activate every node from the termination root.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the network was already started
    pub fn start(&mut self) -> Result<(), NetworkError> {
        if self.started {
            return Err(NetworkError::InvalidConfig("network already started".to_string()));
        }
        self.started = true;
        self.synchronize_clocks();

        let root = self.config.termination_root;
        self.node_mut(root)?.start_process();
        for target in 0..self.node_count_id() {
            if target != root {
                self.activate(root, target)?;
            }
        }
        Ok(())
    }

    /// Adjust every clock toward the master time chosen by the sync policy.
    /// Clocks never move backwards. Returns the master time.
    pub fn synchronize_clocks(&mut self) -> u64 {
        let readings: Vec<u64> = self.nodes.iter().map(Node::own_time).collect();
        let master = master_time(self.config.sync, &readings);
        tracing::info!(?readings, master, policy = ?self.config.sync, "synchronizing clocks");
        for node in &mut self.nodes {
            node.synchronize_clock(master);
        }
        master
    }

    /// Deliver one frame. Returns false if the bus is idle.
    ///
    /// A frame the recipient rejects is logged and recorded as dropped; it
    /// does not fail the step.
    ///
    /// # Errors
    ///
    /// - `Node` if executing the recipient's actions fails
    pub fn step(&mut self) -> Result<bool, NetworkError> {
        let Some(frame) = self.bus.poll(&self.env) else {
            return Ok(false);
        };
        self.steps += 1;

        let recipient = frame.header.recipient();
        let Some(node) = self.nodes.get_mut(recipient as usize) else {
            return Err(NetworkError::UnknownNode(recipient));
        };
        match node.receive(&frame) {
            Ok(actions) => self.execute(recipient, actions)?,
            Err(error) => {
                tracing::warn!(node = recipient, from = frame.header.sender(), %error, "dropped message");
                self.dropped.push(DroppedMessage { node: recipient, error });
            },
        }
        Ok(true)
    }

    /// Step until the bus is idle.
    ///
    /// # Errors
    ///
    /// - `Stalled` if the step budget runs out first
    pub fn run_until_quiescent(&mut self) -> Result<usize, NetworkError> {
        let mut steps = 0;
        while self.step()? {
            steps += 1;
            if steps >= self.config.step_budget && !self.bus.is_idle() {
                return Err(NetworkError::Stalled { steps, report: self.stall_report() });
            }
        }
        Ok(steps)
    }

    /// Step until `done` holds.
    ///
    /// # Errors
    ///
    /// - `Stalled` if the bus goes idle or the step budget runs out while
    ///   `done` is still false
    pub fn run_until(&mut self, mut done: impl FnMut(&Self) -> bool) -> Result<usize, NetworkError> {
        let mut steps = 0;
        loop {
            if done(self) {
                return Ok(steps);
            }
            if steps >= self.config.step_budget || !self.step()? {
                tracing::warn!(steps, "network stalled");
                return Err(NetworkError::Stalled { steps, report: self.stall_report() });
            }
            steps += 1;
        }
    }

    /// Ask for the critical section on behalf of `node`.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`, or `Node` with the mutex error
    pub fn request_mutex(&mut self, node: NodeId) -> Result<(), NetworkError> {
        let actions = self.node_mut(node)?.request_mutex().map_err(|e| NetworkError::node(node, e))?;
        self.execute(node, actions)
    }

    /// Leave the critical section on behalf of `node`.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`, or `Node` with the mutex error
    pub fn release_mutex(&mut self, node: NodeId) -> Result<(), NetworkError> {
        let actions = self.node_mut(node)?.release_mutex().map_err(|e| NetworkError::node(node, e))?;
        self.execute(node, actions)
    }

    /// Start the next snapshot round at `initiator`. Returns the round.
    ///
    /// # Errors
    ///
    /// - `Node` with `Snapshot(InProgress)` if any node is still recording
    pub fn take_snapshot(&mut self, initiator: NodeId) -> Result<u64, NetworkError> {
        self.node(initiator).ok_or(NetworkError::UnknownNode(initiator))?;
        if let Some(busy) = self.nodes.iter().find(|n| n.snapshot().is_recording()) {
            let round = busy.snapshot().round();
            return Err(NetworkError::node(initiator, SnapshotError::InProgress { round }));
        }

        let round = self.latest_round + 1;
        let actions = self
            .node_mut(initiator)?
            .initiate_snapshot(round)
            .map_err(|e| NetworkError::node(initiator, e))?;
        self.latest_round = round;
        self.execute(initiator, actions)?;
        Ok(round)
    }

    /// True once every node has completed `round`.
    pub fn snapshot_complete(&self, round: u64) -> bool {
        self.snapshots.get(&round).is_some_and(|locals| locals.len() == self.nodes.len())
    }

    /// Assembled snapshot for `round`, if every node has completed it.
    pub fn snapshot(&self, round: u64) -> Option<GlobalSnapshot> {
        if !self.snapshot_complete(round) {
            return None;
        }
        let locals = self.snapshots.get(&round)?;
        Some(GlobalSnapshot::assemble(round, locals.values().cloned()))
    }

    /// Most recent globally complete snapshot.
    pub fn global_snapshot(&self) -> Option<GlobalSnapshot> {
        self.snapshots
            .keys()
            .rev()
            .find(|round| self.snapshot_complete(**round))
            .and_then(|round| self.snapshot(*round))
    }

    /// Send application data between neighbors.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`, or `Node` with `NotNeighbor`
    pub fn send_data(&mut self, from: NodeId, to: NodeId, body: Vec<u8>) -> Result<(), NetworkError> {
        let actions = self.node_mut(from)?.send_data(to, body).map_err(|e| NetworkError::node(from, e))?;
        self.execute(from, actions)
    }

    /// Record a local event at `node`.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`
    pub fn local_event(&mut self, node: NodeId, label: impl Into<String>) -> Result<(), NetworkError> {
        self.node_mut(node)?.local_event(label);
        Ok(())
    }

    /// Engage `target` in `from`'s work.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`, or `Node` with `NotActive`
    pub fn activate(&mut self, from: NodeId, target: NodeId) -> Result<(), NetworkError> {
        self.node(target).ok_or(NetworkError::UnknownNode(target))?;
        let actions = self.node_mut(from)?.activate(target).map_err(|e| NetworkError::node(from, e))?;
        self.execute(from, actions)
    }

    /// Mark `node`'s local work as done.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`
    pub fn finish_process(&mut self, node: NodeId) -> Result<(), NetworkError> {
        let actions = self.node_mut(node)?.finish_process();
        self.execute(node, actions)
    }

    /// Allocate a managed object at `node`.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`, or `Node` with the collector error
    pub fn allocate(&mut self, node: NodeId, tag: impl Into<String>) -> Result<Address, NetworkError> {
        self.node_mut(node)?.allocate(tag).map_err(|e| NetworkError::node(node, e))
    }

    /// Release a managed object at `node`.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`, or `Node` with `InvalidAddress`
    pub fn release_object(&mut self, node: NodeId, address: Address) -> Result<(), NetworkError> {
        self.node_mut(node)?.release_object(address).map_err(|e| NetworkError::node(node, e))
    }

    /// Run a collection cycle at `node`.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`
    pub fn collect_garbage(&mut self, node: NodeId) -> Result<CollectionReport, NetworkError> {
        Ok(self.node_mut(node)?.collect_garbage())
    }

    /// Current waiting relations.
    pub fn stall_report(&self) -> StallReport {
        let mut report = StallReport { pending_messages: self.bus.pending(), ..StallReport::default() };
        for node in &self.nodes {
            if node.mutex_status() == MutexStatus::Waiting {
                report.mutex_waiting.push((node.id(), node.mutex_waiting_on()));
            }
            if node.snapshot().is_recording() {
                report.snapshot_waiting.push((node.id(), node.snapshot().missing_markers()));
            }
            if node.termination().is_engaged() {
                report.engaged.push(node.id());
            }
        }
        report
    }

    /// Node `id`.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    /// All nodes, indexed by id.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Critical section intervals in entry order.
    pub fn entries(&self) -> &[CriticalSectionEntry] {
        &self.entries
    }

    /// Node currently in the critical section.
    pub fn holder(&self) -> Option<NodeId> {
        self.entries.iter().rev().find(|e| e.left_at.is_none()).map(|e| e.node)
    }

    /// Global termination record.
    pub fn termination(&self) -> Option<&TerminationRecord> {
        self.termination.as_ref()
    }

    /// Messages rejected by their recipient.
    pub fn dropped(&self) -> &[DroppedMessage] {
        &self.dropped
    }

    /// Frames delivered so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The message bus.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Active configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Randomness source.
    pub fn env(&self) -> &E {
        &self.env
    }

    fn node_count_id(&self) -> NodeId {
        NodeId::try_from(self.nodes.len()).unwrap_or(NodeId::MAX)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, NetworkError> {
        self.nodes.get_mut(id as usize).ok_or(NetworkError::UnknownNode(id))
    }

    fn execute(&mut self, node: NodeId, actions: Vec<NodeAction>) -> Result<(), NetworkError> {
        for action in actions {
            match action {
                NodeAction::Send { to, message } => {
                    self.bus.send(to, message).map_err(|e| NetworkError::node(node, e))?;
                },
                NodeAction::EnteredCriticalSection => {
                    if let Some(holder) = self.holder() {
                        tracing::error!(node, holder, "critical section entered while held");
                    }
                    let clock = self.node(node).map(|n| n.clock().clone()).unwrap_or(LogicalClock::Scalar(0));
                    self.entries.push(CriticalSectionEntry {
                        node,
                        entered_at: self.steps,
                        left_at: None,
                        clock,
                    });
                },
                NodeAction::LeftCriticalSection => {
                    let steps = self.steps;
                    if let Some(entry) =
                        self.entries.iter_mut().rev().find(|e| e.node == node && e.left_at.is_none())
                    {
                        entry.left_at = Some(steps);
                    }
                },
                NodeAction::SnapshotComplete(local) => {
                    self.snapshots.entry(local.round).or_default().insert(node, local);
                },
                NodeAction::GlobalTermination => {
                    let step = self.steps;
                    let record = self
                        .termination
                        .get_or_insert(TerminationRecord { node, step, signals: 0 });
                    record.signals += 1;
                    if record.signals > 1 {
                        tracing::error!(node, signals = record.signals, "termination signalled again");
                    }
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_configuration() {
        assert!(matches!(Network::setup(0, Topology::Complete), Err(NetworkError::InvalidConfig(_))));

        let config = NetworkConfig { termination_root: 5, ..NetworkConfig::default() };
        let result = Network::with_config(3, Topology::Complete, config, SystemEnv::new());
        assert!(matches!(result, Err(NetworkError::InvalidConfig(_))));

        assert!(matches!(
            Network::setup(3, Topology::Star { center: 9 }),
            Err(NetworkError::Topology(_))
        ));
    }

    #[test]
    fn start_builds_termination_tree() {
        let mut net = Network::setup(3, Topology::Complete).expect("valid");
        net.start().expect("first start");
        net.run_until_quiescent().expect("quiesces");

        assert_eq!(net.node(1).and_then(|n| n.termination().parent()), Some(0));
        assert_eq!(net.node(2).and_then(|n| n.termination().parent()), Some(0));
        assert!(net.start().is_err());
    }

    #[test]
    fn synchronization_moves_clocks_forward_only() {
        let config = NetworkConfig { initial_clock: InitialClock::Fixed(7), ..NetworkConfig::default() };
        let mut net = Network::with_config(2, Topology::Complete, config, SystemEnv::new()).expect("valid");
        assert_eq!(net.synchronize_clocks(), 7);
        assert!(net.nodes().iter().all(|n| n.own_time() == 7));
    }

    #[test]
    fn mutual_exclusion_round_trip() {
        let mut net = Network::setup(3, Topology::Complete).expect("valid");
        net.request_mutex(1).expect("idle");
        net.run_until(|n| n.holder() == Some(1)).expect("granted");

        net.release_mutex(1).expect("holding");
        net.run_until_quiescent().expect("quiesces");
        assert_eq!(net.entries().len(), 1);
        assert!(net.entries()[0].left_at.is_some());
        assert!(net.stall_report().mutex_waiting.is_empty());
    }

    #[test]
    fn unanswered_request_is_reported_as_stall() {
        let mut net = Network::setup(2, Topology::Complete).expect("valid");
        net.request_mutex(0).expect("idle");
        net.request_mutex(1).expect("idle");
        net.run_until(|n| n.holder() == Some(0)).expect("lower id wins");

        let err = net.run_until(|n| n.holder() == Some(1)).unwrap_err();
        let NetworkError::Stalled { report, .. } = err else {
            panic!("expected a stall, got {err:?}");
        };
        assert_eq!(report.mutex_waiting, vec![(1, vec![0])]);
    }

    #[test]
    fn snapshot_requires_previous_round_to_finish() {
        let mut net = Network::setup(3, Topology::Ring).expect("valid");
        let round = net.take_snapshot(0).expect("idle");
        assert!(matches!(
            net.take_snapshot(1),
            Err(NetworkError::Node { source: NodeError::Snapshot(SnapshotError::InProgress { .. }), .. })
        ));

        net.run_until(|n| n.snapshot_complete(round)).expect("completes");
        let snapshot = net.global_snapshot().expect("complete");
        assert_eq!(snapshot.round, 1);
        assert_eq!(snapshot.verify(), Ok(()));
        assert_eq!(net.take_snapshot(2), Ok(2));
    }

    #[test]
    fn unknown_nodes_are_rejected() {
        let mut net = Network::setup(2, Topology::Complete).expect("valid");
        assert_eq!(net.request_mutex(4), Err(NetworkError::UnknownNode(4)));
        assert_eq!(net.activate(0, 9), Err(NetworkError::UnknownNode(9)));
    }
}
