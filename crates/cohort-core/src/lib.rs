//! Cohort core
//!
//! Action-based state machines for classical distributed coordination:
//! logical clocks, mutual exclusion, global snapshots, termination detection
//! and per-node garbage collection, plus the network that runs them.
//!
//! # Architecture
//!
//! Every component is Sans-IO. Operations take inputs and return actions
//! (`MutexAction`, `SnapshotAction`, `TerminationAction`) that the owning
//! [`Node`] turns into [`NodeAction`]s: stamped messages to send and
//! notifications. The [`Network`] executes node actions against the
//! [`MessageBus`], one delivery per [`Network::step`], which keeps a run
//! deterministic for a given [`Environment`].
//!
//! # Components
//!
//! - [`ClockService`]: scalar and vector logical clocks
//! - [`MessageBus`]: per-channel FIFO delivery over encoded frames
//! - [`Collector`]: generational and copying garbage collection
//! - [`MutualExclusion`]: token tree and permission voting
//! - [`SnapshotCoordinator`]: Chandy–Lamport snapshots
//! - [`TerminationDetector`]: Dijkstra–Scholten termination detection
//! - [`Node`] / [`Network`]: composition and the event loop
//!
//! # Actor runtime (optional)
//!
//! With the `actors` feature enabled, [`actor::ActorNetwork`] runs each node
//! as its own tokio task.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

#[cfg(feature = "actors")]
pub mod actor;
pub mod bus;
pub mod clock;
pub mod env;
pub mod error;
pub mod gc;
pub mod mutex;
pub mod network;
pub mod node;
pub mod snapshot;
pub mod state;
pub mod termination;
pub mod topology;

pub use bus::{DeliveryOrder, Envelope, MessageBus};
pub use clock::{ClockService, SyncPolicy};
pub use cohort_proto::{ClockKind, LogicalClock, Message, NodeId, Payload, Tag};
pub use env::{Environment, SystemEnv};
pub use error::{
    BusError, ClockError, GcError, MutexError, NetworkError, NodeError, SnapshotError,
    TerminationError, TopologyError,
};
pub use gc::{Address, CollectionReport, Collector, CollectorStrategy, ManagedObject};
pub use mutex::{MutexAction, MutexStatus, MutexStrategy, MutualExclusion};
pub use network::{
    CriticalSectionEntry, InitialClock, Network, NetworkConfig, StallReport, TerminationRecord,
};
pub use node::{Node, NodeAction, NodeConfig};
pub use snapshot::{GlobalSnapshot, LocalSnapshot, SnapshotCoordinator, SnapshotPhase};
pub use state::ProcessState;
pub use termination::{TerminationAction, TerminationDetector};
pub use topology::Topology;
