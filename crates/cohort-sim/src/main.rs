//! Cohort simulation binary.
//!
//! Runs the seeded mixed task (mutex requests, data, allocations, snapshot
//! rounds, collection, termination) and logs what happened.
//!
//! # Usage
//!
//! ```bash
//! # Three nodes, permission voting, scalar clocks
//! cohort-sim --nodes 3 --tasks 6 --seed 42
//!
//! # Token tree with vector clocks on a ring
//! cohort-sim --nodes 6 --mutex token-tree --clock vector --topology ring
//!
//! # One tokio task per node
//! cohort-sim --runtime actors
//! ```

use clap::{Parser, ValueEnum};
use cohort_core::{
    ClockKind, CollectorStrategy, DeliveryOrder, Environment, InitialClock, MutexStrategy,
    NetworkConfig, Node, NodeConfig, NodeId, SystemEnv, Topology,
    actor::{ActorEvent, ActorNetwork},
};
use cohort_harness::{InvariantRegistry, SimEnv, Workload, WorkloadConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MutexArg {
    /// Ricart–Agrawala
    Permission,
    /// Raymond's token tree rooted at node 0
    TokenTree,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ClockArg {
    Scalar,
    Vector,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CollectorArg {
    Generational,
    Copying,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TopologyArg {
    Complete,
    Ring,
    Line,
    Star,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RuntimeArg {
    /// Deterministic single-threaded network
    Simulated,
    /// One tokio task per node
    Actors,
}

/// Cohort coordination simulator
#[derive(Parser, Debug)]
#[command(name = "cohort-sim")]
#[command(about = "Simulate clocks, mutual exclusion, snapshots, termination and collection")]
#[command(version)]
struct Args {
    /// Number of nodes
    #[arg(short, long, default_value = "3")]
    nodes: usize,

    /// Number of tasks to run
    #[arg(short, long, default_value = "6")]
    tasks: usize,

    /// RNG seed (random if omitted)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Mutual exclusion strategy
    #[arg(long, value_enum, default_value = "permission")]
    mutex: MutexArg,

    /// Clock representation
    #[arg(long, value_enum, default_value = "scalar")]
    clock: ClockArg,

    /// Collector strategy
    #[arg(long, value_enum, default_value = "generational")]
    collector: CollectorArg,

    /// Survivors kept young per minor collection
    #[arg(long, default_value = "100")]
    young_threshold: usize,

    /// Semispace size for the copying collector
    #[arg(long, default_value = "8")]
    capacity: usize,

    /// Neighbor graph
    #[arg(long, value_enum, default_value = "complete")]
    topology: TopologyArg,

    /// Take a snapshot every N tasks (0 disables)
    #[arg(long, default_value = "2")]
    snapshot_every: usize,

    /// Largest random initial clock value
    #[arg(long, default_value = "30")]
    max_initial_clock: u64,

    /// Deliver frames in random order (per-channel FIFO still holds)
    #[arg(long)]
    random_delivery: bool,

    /// Execution runtime
    #[arg(long, value_enum, default_value = "simulated")]
    runtime: RuntimeArg,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            clock: match self.clock {
                ClockArg::Scalar => ClockKind::Scalar,
                ClockArg::Vector => ClockKind::Vector,
            },
            initial_clock: InitialClock::Random { max: self.max_initial_clock },
            mutex: match self.mutex {
                MutexArg::Permission => MutexStrategy::PermissionVoting,
                MutexArg::TokenTree => MutexStrategy::TokenTree { root: 0 },
            },
            collector: match self.collector {
                CollectorArg::Generational => {
                    CollectorStrategy::Generational { young_threshold: self.young_threshold }
                },
                CollectorArg::Copying => CollectorStrategy::Copying { capacity: self.capacity },
            },
            delivery: if self.random_delivery { DeliveryOrder::Random } else { DeliveryOrder::Fifo },
            ..NetworkConfig::default()
        }
    }

    fn topology(&self) -> Topology {
        match self.topology {
            TopologyArg::Complete => Topology::Complete,
            TopologyArg::Ring => Topology::Ring,
            TopologyArg::Line => Topology::Line,
            TopologyArg::Star => Topology::Star { center: 0 },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let seed = args.seed.unwrap_or_else(|| SystemEnv::new().random_u64());
    tracing::info!(seed, nodes = args.nodes, tasks = args.tasks, runtime = ?args.runtime, "Cohort simulation starting");

    match args.runtime {
        RuntimeArg::Simulated => run_simulated(&args, seed),
        RuntimeArg::Actors => run_actors(&args, seed).await,
    }
}

fn run_simulated(args: &Args, seed: u64) -> Result<(), Box<dyn std::error::Error>> {
    let config = WorkloadConfig {
        nodes: args.nodes,
        tasks: args.tasks,
        topology: args.topology(),
        network: args.network_config(),
        snapshot_every: args.snapshot_every,
    };
    let mut workload = Workload::new(config, seed)?;
    let report = workload.run()?;

    tracing::info!(order = ?report.entry_order, "critical section entries");
    for (node, collection) in &report.collections {
        tracing::info!(
            node,
            kind = ?collection.kind,
            reclaimed = collection.reclaimed,
            promoted = collection.promoted,
            live = collection.live,
            "collection"
        );
    }

    let network = workload.network();
    if let Some(snapshot) = network.global_snapshot() {
        for (node, state) in &snapshot.states {
            tracing::info!(round = snapshot.round, node, %state, "recorded state");
        }
        for ((from, to), bodies) in &snapshot.channels {
            if !bodies.is_empty() {
                tracing::info!(round = snapshot.round, from, to, in_transit = bodies.len(), "recorded channel");
            }
        }
    }
    for node in network.nodes() {
        tracing::info!(node = node.id(), clock = %node.clock(), "final clock");
    }

    if let Err(violations) = InvariantRegistry::standard().check_all(workload.observed()) {
        for violation in &violations {
            tracing::error!(%violation, "invariant violated");
        }
        return Err(format!("{} invariant violations", violations.len()).into());
    }

    match &report.termination {
        Some(record) => tracing::info!(
            node = record.node,
            step = record.step,
            steps = report.steps,
            out_of_memory = report.out_of_memory,
            "global termination detected"
        ),
        None => tracing::warn!("run ended without termination"),
    }
    Ok(())
}

async fn run_actors(args: &Args, seed: u64) -> Result<(), Box<dyn std::error::Error>> {
    let env = SimEnv::with_seed(seed);
    let network = args.network_config();
    let node_config = NodeConfig {
        clock: network.clock,
        mutex: network.mutex,
        collector: network.collector,
        termination_root: network.termination_root,
    };

    let adjacency = args.topology().neighbors(args.nodes)?;
    let nodes: Vec<Node> = adjacency
        .iter()
        .cloned()
        .zip(0..)
        .map(|(neighbors, id)| {
            let initial = env.random_below(args.max_initial_clock.saturating_add(1));
            Node::new(id, args.nodes, neighbors, &node_config, initial)
        })
        .collect();
    let node_count = nodes.len() as NodeId;

    let mut net = ActorNetwork::spawn(nodes);
    let root = network.termination_root;
    net.start_process(root).await?;
    for target in (0..node_count).filter(|t| *t != root) {
        net.activate(root, target).await?;
    }

    for task in 0..args.tasks {
        let node = env.random_below(u64::from(node_count)) as NodeId;
        net.request_mutex(node).await?;
        net.release_mutex(node).await?;

        let neighbors = &adjacency[node as usize];
        if !neighbors.is_empty() {
            let to = neighbors[env.random_below(neighbors.len() as u64) as usize];
            net.send_data(node, to, format!("task {task}").into_bytes()).await?;
        }
    }

    let local = net.take_snapshot(0, 1).await?;
    tracing::info!(node = local.node, state = %local.state, "initiator snapshot");

    for node in 0..node_count {
        net.finish_process(node).await?;
    }

    let mut entries = 0usize;
    while let Some(event) = net.next_event().await {
        match event {
            ActorEvent::Entered(_) => entries += 1,
            ActorEvent::Dropped { node, error } => tracing::warn!(node, %error, "dropped message"),
            ActorEvent::GlobalTermination(node) => {
                tracing::info!(node, entries, "global termination detected");
                break;
            },
            ActorEvent::Left(_) | ActorEvent::SnapshotComplete(_) => {},
        }
    }

    net.shutdown().await;
    Ok(())
}
