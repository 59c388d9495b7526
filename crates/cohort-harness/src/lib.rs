//! Deterministic simulation harness for Cohort protocol testing.
//!
//! A seeded [`SimEnv`] replaces the system RNG so that initial clock skew and
//! random delivery order replay exactly for a given seed.
//!
//! # Workloads
//!
//! The `model` module provides randomized [`Operation`]s (derived with
//! `arbitrary`, generated by proptest) and the seeded [`Workload`] that drives
//! a [`cohort_core::Network`] through a mixed task: mutex requests, data
//! sends, allocations, snapshot rounds, collections and finally termination.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for the full set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod model;
pub mod sim_env;

pub use invariants::{
    ClockMonotonicity, HeapIntegrity, Invariant, InvariantRegistry, InvariantResult,
    MutualExclusionSafety, NodeSnapshot, SnapshotConsistency, SystemSnapshot, TerminationSafety,
    Violation,
};
pub use model::{
    NodeIndex, Operation, OperationError, OperationResult, SmallBody, TaskReport, Workload,
    WorkloadConfig,
};
pub use sim_env::SimEnv;
