//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture the observable state of a network at a point in time.
//! Invariants operate on snapshots rather than live state so a check sees one
//! consistent view. Clock readings accumulate across [`SystemSnapshot::observe`]
//! calls, which is what lets monotonicity be checked at all.

use cohort_core::{
    CollectorStrategy, CriticalSectionEntry, Environment, GlobalSnapshot, LogicalClock,
    ManagedObject, MutexStatus, Network, NodeId, TerminationRecord,
};

/// Snapshot of the entire system state.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-node state, indexed by node id.
    pub nodes: Vec<NodeSnapshot>,
    /// Critical section intervals in entry order.
    pub entries: Vec<CriticalSectionEntry>,
    /// Every globally complete snapshot round.
    pub snapshots: Vec<GlobalSnapshot>,
    /// Termination detection outcome.
    pub termination: Option<TerminationRecord>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no nodes).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single node.
    pub fn single(node: NodeSnapshot) -> Self {
        Self { nodes: vec![node], ..Self::default() }
    }

    /// Create a snapshot from multiple nodes.
    pub fn from_nodes(nodes: Vec<NodeSnapshot>) -> Self {
        Self { nodes, ..Self::default() }
    }

    /// Capture the current state of `network`.
    pub fn from_network<E: Environment>(network: &Network<E>) -> Self {
        let mut snapshot = Self::empty();
        snapshot.observe(network);
        snapshot
    }

    /// Refresh from `network`, appending each node's current clock to its
    /// history.
    pub fn observe<E: Environment>(&mut self, network: &Network<E>) {
        if self.nodes.len() != network.nodes().len() {
            self.nodes = network.nodes().iter().map(|n| NodeSnapshot::new(n.id())).collect();
        }

        for (snapshot, node) in self.nodes.iter_mut().zip(network.nodes()) {
            snapshot.clock_history.push(node.clock().clone());
            snapshot.mutex_status = node.mutex_status();
            snapshot.active = node.termination().is_active();
            snapshot.engaged = node.termination().is_engaged();
            snapshot.heap = node.collector().live_objects();
            snapshot.heap_capacity = match node.collector().strategy() {
                CollectorStrategy::Copying { capacity } => Some(capacity),
                CollectorStrategy::Generational { .. } => None,
            };
        }

        let latest = network.nodes().iter().map(|n| n.snapshot().round()).max().unwrap_or(0);
        self.snapshots = (1..=latest).filter_map(|round| network.snapshot(round)).collect();
        self.entries = network.entries().to_vec();
        self.termination = network.termination().cloned();
    }

    /// Add a node snapshot.
    pub fn add_node(&mut self, node: NodeSnapshot) {
        self.nodes.push(node);
    }
}

/// Snapshot of a single node's observable state.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    /// Node identifier.
    pub id: NodeId,
    /// Clock readings, oldest first.
    pub clock_history: Vec<LogicalClock>,
    /// Mutual exclusion status.
    pub mutex_status: MutexStatus,
    /// Local work still running.
    pub active: bool,
    /// Still part of the termination tree.
    pub engaged: bool,
    /// Live objects in the node's collector.
    pub heap: Vec<ManagedObject>,
    /// Arena size for a copying collector.
    pub heap_capacity: Option<usize>,
}

impl NodeSnapshot {
    /// Create an idle node snapshot.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            clock_history: Vec::new(),
            mutex_status: MutexStatus::Idle,
            active: false,
            engaged: false,
            heap: Vec::new(),
            heap_capacity: None,
        }
    }

    /// Record a clock observation.
    pub fn with_clock(mut self, clock: LogicalClock) -> Self {
        self.clock_history.push(clock);
        self
    }

    /// Set mutex status.
    pub fn with_status(mut self, status: MutexStatus) -> Self {
        self.mutex_status = status;
        self
    }

    /// Set termination flags.
    pub fn with_activity(mut self, active: bool, engaged: bool) -> Self {
        self.active = active;
        self.engaged = engaged;
        self
    }

    /// Set live objects and arena size.
    pub fn with_heap(mut self, heap: Vec<ManagedObject>, capacity: Option<usize>) -> Self {
        self.heap = heap;
        self.heap_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use cohort_core::Topology;

    use super::*;
    use crate::SimEnv;

    #[test]
    fn empty_snapshot() {
        let snapshot = SystemSnapshot::empty();
        assert!(snapshot.nodes.is_empty());
        assert!(snapshot.termination.is_none());
    }

    #[test]
    fn node_snapshot_builder() {
        let node = NodeSnapshot::new(3)
            .with_clock(LogicalClock::Scalar(4))
            .with_status(MutexStatus::Waiting)
            .with_activity(true, true);

        assert_eq!(node.id, 3);
        assert_eq!(node.clock_history, vec![LogicalClock::Scalar(4)]);
        assert_eq!(node.mutex_status, MutexStatus::Waiting);
        assert!(node.active && node.engaged);
    }

    #[test]
    fn observe_accumulates_clock_history() {
        let mut network = Network::with_config(
            3,
            Topology::Complete,
            cohort_core::NetworkConfig::default(),
            SimEnv::with_seed(0),
        )
        .expect("network");

        let mut snapshot = SystemSnapshot::from_network(&network);
        network.send_data(0, 1, b"x".to_vec()).expect("send");
        network.run_until_quiescent().expect("drain");
        snapshot.observe(&network);

        assert_eq!(snapshot.nodes.len(), 3);
        assert_eq!(snapshot.nodes[0].clock_history.len(), 2);
        assert!(snapshot.nodes[1].clock_history[0].happened_before(&snapshot.nodes[1].clock_history[1]));
    }
}
