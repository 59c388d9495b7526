//! Seeded workload driver.
//!
//! A [`Workload`] owns a [`Network`] running on a [`SimEnv`] and drives it
//! either with explicit [`Operation`]s or through the mixed task of
//! [`Workload::run`]. Every choice is drawn from the environment, so a seed
//! replays the same run, delivery order included.

use cohort_core::{
    Address, CollectionReport, Environment, InitialClock, Network, NetworkConfig, NetworkError,
    NodeId, TerminationRecord, Topology,
};
use serde::Serialize;

use super::{NodeIndex, Operation, OperationError, OperationResult};
use crate::{SimEnv, SystemSnapshot};

/// Workload shape.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Network size
    pub nodes: usize,
    /// Tasks in [`Workload::run`]
    pub tasks: usize,
    /// Neighbor graph
    pub topology: Topology,
    /// Protocol configuration
    pub network: NetworkConfig,
    /// Take a snapshot after every `snapshot_every` tasks; 0 disables
    pub snapshot_every: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            tasks: 6,
            topology: Topology::Complete,
            network: NetworkConfig {
                initial_clock: InitialClock::Random { max: 30 },
                ..NetworkConfig::default()
            },
            snapshot_every: 2,
        }
    }
}

/// Outcome of [`Workload::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    /// Node that ran each task
    pub task_nodes: Vec<NodeId>,
    /// Critical section holders in entry order
    pub entry_order: Vec<NodeId>,
    /// Completed snapshot rounds
    pub snapshot_rounds: Vec<u64>,
    /// Final collection cycle per node
    pub collections: Vec<(NodeId, CollectionReport)>,
    /// Allocations refused for lack of space
    pub out_of_memory: usize,
    /// Where and when termination was detected
    pub termination: Option<TerminationRecord>,
    /// Frames delivered
    pub steps: u64,
    /// Frames discarded by their recipient
    pub dropped: usize,
}

/// Seeded driver for one network.
#[derive(Debug)]
pub struct Workload {
    network: Network<SimEnv>,
    env: SimEnv,
    tasks: usize,
    snapshot_every: usize,
    observed: SystemSnapshot,
}

impl Workload {
    /// Build the network described by `config`, seeded with `seed`.
    ///
    /// # Errors
    ///
    /// - Any configuration error from [`Network::with_config`]
    pub fn new(config: WorkloadConfig, seed: u64) -> Result<Self, NetworkError> {
        let env = SimEnv::with_seed(seed);
        let network = Network::with_config(config.nodes, config.topology, config.network, env.clone())?;
        let observed = SystemSnapshot::from_network(&network);
        Ok(Self {
            network,
            env,
            tasks: config.tasks,
            snapshot_every: config.snapshot_every,
            observed,
        })
    }

    /// The driven network.
    pub fn network(&self) -> &Network<SimEnv> {
        &self.network
    }

    /// Mutable access for scenario setup.
    pub fn network_mut(&mut self) -> &mut Network<SimEnv> {
        &mut self.network
    }

    /// Accumulated observations for invariant checks.
    pub fn observed(&self) -> &SystemSnapshot {
        &self.observed
    }

    /// Record the network's current state.
    pub fn observe(&mut self) {
        self.observed.observe(&self.network);
    }

    /// Apply one operation and observe the result.
    ///
    /// # Errors
    ///
    /// Any network error that [`OperationError::classify`] does not accept as
    /// an expected refusal.
    pub fn apply(&mut self, op: &Operation) -> Result<OperationResult, NetworkError> {
        let outcome = self.dispatch(op);
        self.observe();

        match outcome {
            Ok(result) => Ok(result),
            Err(error) => match OperationError::classify(&error) {
                Some(refusal) => {
                    tracing::debug!(?op, %error, "operation refused");
                    Ok(OperationResult::Rejected(refusal))
                },
                None => Err(error),
            },
        }
    }

    fn dispatch(&mut self, op: &Operation) -> Result<OperationResult, NetworkError> {
        let node_count = self.network.nodes().len() as NodeId;
        let wrap = |raw: NodeIndex| NodeId::from(raw) % node_count;

        match op {
            Operation::RequestMutex { node } => self.network.request_mutex(wrap(*node))?,
            Operation::ReleaseMutex { node } => self.network.release_mutex(wrap(*node))?,
            Operation::SendData { from, to, body } => {
                self.network.send_data(wrap(*from), wrap(*to), body.to_bytes())?;
            },
            Operation::LocalEvent { node } => self.network.local_event(wrap(*node), "operation")?,
            Operation::TakeSnapshot { initiator } => {
                self.network.take_snapshot(wrap(*initiator))?;
            },
            Operation::Allocate { node } => {
                self.network.allocate(wrap(*node), "object")?;
            },
            Operation::ReleaseObject { node, pick } => {
                let node = wrap(*node);
                let Some(address) = self.live_address(node, usize::from(*pick)) else {
                    return Ok(OperationResult::Rejected(OperationError::NothingToRelease));
                };
                self.network.release_object(node, address)?;
            },
            Operation::Collect { node } => {
                self.network.collect_garbage(wrap(*node))?;
            },
            Operation::Step { count } => {
                for _ in 0..*count {
                    if !self.network.step()? {
                        break;
                    }
                }
            },
            Operation::DeliverAll => {
                self.network.run_until_quiescent()?;
            },
        }
        Ok(OperationResult::Ok)
    }

    /// Run the mixed task and drive the network to global termination.
    ///
    /// Each task picks a random node, which takes the critical section,
    /// updates its state, allocates an object, leaves and sends data to a
    /// random neighbor. A snapshot round is taken every `snapshot_every`
    /// tasks. Afterwards every node collects garbage, clocks are
    /// resynchronized and every process finishes.
    ///
    /// # Errors
    ///
    /// - `Stalled` if any phase cannot complete
    /// - Any unexpected network error
    pub fn run(&mut self) -> Result<TaskReport, NetworkError> {
        let mut report = TaskReport::default();

        self.network.start()?;
        self.network.run_until(|net| net.nodes().iter().all(|n| n.termination().is_active()))?;
        self.observe();

        for task in 0..self.tasks {
            let node = self.random_node();
            report.task_nodes.push(node);
            self.run_task(task, node, &mut report)?;

            if self.snapshot_every > 0 && task % self.snapshot_every == self.snapshot_every - 1 {
                let round = self.network.take_snapshot(0)?;
                self.network.run_until(|net| net.snapshot_complete(round))?;
                tracing::info!(round, task, "snapshot round complete");
                report.snapshot_rounds.push(round);
                self.observe();
            }
        }

        for node in self.node_ids() {
            let collection = self.network.collect_garbage(node)?;
            report.collections.push((node, collection));
        }
        self.network.synchronize_clocks();
        self.observe();

        for node in self.node_ids() {
            self.network.finish_process(node)?;
        }
        self.network.run_until(|net| net.termination().is_some())?;
        self.network.run_until_quiescent()?;
        self.observe();

        report.entry_order = self.network.entries().iter().map(|e| e.node).collect();
        report.termination = self.network.termination().cloned();
        report.steps = self.network.steps();
        report.dropped = self.network.dropped().len();
        Ok(report)
    }

    fn run_task(&mut self, task: usize, node: NodeId, report: &mut TaskReport) -> Result<(), NetworkError> {
        tracing::debug!(task, node, "task starting");
        self.network.request_mutex(node)?;
        self.network.run_until(|net| net.holder() == Some(node))?;

        let outcome = 1 + self.env.random_below(10);
        self.network.local_event(node, format!("state after task {outcome}"))?;

        if self.env.random_below(2) == 0 {
            let pick = self.env.random_below(u64::from(u32::MAX)) as usize;
            if let Some(address) = self.live_address(node, pick) {
                self.network.release_object(node, address)?;
            }
        }
        let sample = 1 + self.env.random_below(1000);
        match self.network.allocate(node, format!("sample-{sample}")) {
            Ok(_) => {},
            Err(error) if OperationError::classify(&error) == Some(OperationError::OutOfMemory) => {
                tracing::warn!(task, node, %error, "allocation refused");
                report.out_of_memory += 1;
            },
            Err(error) => return Err(error),
        }

        self.network.release_mutex(node)?;

        let neighbors = self.network.node(node).map(|n| n.neighbors().to_vec()).unwrap_or_default();
        if !neighbors.is_empty() {
            let to = neighbors[self.env.random_below(neighbors.len() as u64) as usize];
            self.network.send_data(node, to, format!("task {task}").into_bytes())?;
        }
        self.observe();
        Ok(())
    }

    fn live_address(&self, node: NodeId, pick: usize) -> Option<Address> {
        let live = self.network.node(node)?.collector().live_objects();
        if live.is_empty() {
            return None;
        }
        Some(live[pick % live.len()].address)
    }

    fn random_node(&self) -> NodeId {
        self.env.random_below(self.network.nodes().len() as u64) as NodeId
    }

    fn node_ids(&self) -> std::ops::Range<NodeId> {
        0..self.network.nodes().len() as NodeId
    }
}
