//! Randomized workloads.
//!
//! [`Operation`]s are small, composable actions that proptest combines into
//! arbitrary schedules; [`Workload`] applies them to a seeded network and
//! also runs the fixed mixed task used by the demo binary.

mod operation;
mod workload;

pub use operation::{NodeIndex, Operation, OperationError, OperationResult, SmallBody};
pub use workload::{TaskReport, Workload, WorkloadConfig};
