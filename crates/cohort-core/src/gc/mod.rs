//! Per-node object lifecycle management.
//!
//! A node allocates [`ManagedObject`]s for the work it performs and releases
//! them when done. Liveness is explicit: an object is reachable until the
//! mutator calls [`Collector::release`]. Two strategies are provided:
//!
//! - [`GenerationalCollector`]: young/old lists with promotion
//! - [`CopyingCollector`]: fixed semispaces compacted by Cheney copying

mod copying;
mod generational;

use std::fmt;

use cohort_proto::NodeId;
pub use copying::CopyingCollector;
pub use generational::GenerationalCollector;
use serde::{Deserialize, Serialize};

use crate::error::GcError;

/// Logical address of a managed object.
///
/// Stable for the lifetime of the object under the generational strategy;
/// a slot index that changes on every collection under the copying strategy.
pub type Address = usize;

/// Object owned by a collector arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedObject {
    /// Node whose collector owns the object
    pub owner: NodeId,
    /// Application label
    pub tag: String,
    /// Current address
    pub address: Address,
}

impl fmt::Display for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}(node {})", self.tag, self.address, self.owner)
    }
}

/// Collector selection and sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectorStrategy {
    /// Young/old generations. `young_threshold` survivors stay young.
    Generational {
        /// Survivors kept in the young generation per minor collection
        young_threshold: usize,
    },
    /// Cheney semispace copying with `capacity` slots per space.
    Copying {
        /// Slots per semispace
        capacity: usize,
    },
}

impl Default for CollectorStrategy {
    fn default() -> Self {
        Self::Generational { young_threshold: 100 }
    }
}

impl CollectorStrategy {
    /// Build a collector for `owner`.
    pub fn build(self, owner: NodeId) -> Box<dyn Collector> {
        match self {
            Self::Generational { young_threshold } => {
                Box::new(GenerationalCollector::new(owner, young_threshold))
            },
            Self::Copying { capacity } => Box::new(CopyingCollector::new(owner, capacity)),
        }
    }
}

/// Which kind of cycle produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Young generation only
    Minor,
    /// Both generations
    Full,
    /// Semispace flip
    Copy,
}

/// Outcome of one collection cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionReport {
    /// Cycle kind
    pub kind: CollectionKind,
    /// Objects reclaimed
    pub reclaimed: usize,
    /// Objects moved from young to old
    pub promoted: usize,
    /// Live objects after the cycle
    pub live: usize,
    /// `(old, new)` address pairs for objects that moved
    pub relocations: Vec<(Address, Address)>,
}

impl CollectionReport {
    pub(crate) fn new(kind: CollectionKind) -> Self {
        Self { kind, reclaimed: 0, promoted: 0, live: 0, relocations: Vec::new() }
    }
}

/// Garbage collection capability set.
///
/// # Invariants
///
/// - `collect()` never reclaims an object that has not been released.
/// - Every live object has a unique address.
pub trait Collector: fmt::Debug + Send {
    /// Allocate an object tagged `tag`.
    ///
    /// # Errors
    ///
    /// - `OutOfMemory` if a bounded arena cannot make room
    fn allocate(&mut self, tag: String) -> Result<Address, GcError>;

    /// Mark the object at `address` unreachable.
    ///
    /// # Errors
    ///
    /// - `InvalidAddress` if no unreleased object lives there
    fn release(&mut self, address: Address) -> Result<(), GcError>;

    /// Run one collection cycle.
    fn collect(&mut self) -> CollectionReport;

    /// Run the most thorough cycle the strategy has. Defaults to `collect`.
    fn collect_full(&mut self) -> CollectionReport {
        self.collect()
    }

    /// Objects not yet reclaimed and not released, in address order.
    fn live_objects(&self) -> Vec<ManagedObject>;

    /// Collection cycles run so far, automatic ones included.
    fn collections(&self) -> u64;

    /// Strategy this collector implements.
    fn strategy(&self) -> CollectorStrategy;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_strategy_is_generational() {
        let collector = CollectorStrategy::default().build(0);
        assert_eq!(collector.strategy(), CollectorStrategy::Generational { young_threshold: 100 });
    }

    #[test]
    fn built_collector_tags_owner() {
        let mut collector = CollectorStrategy::Copying { capacity: 2 }.build(4);
        let addr = collector.allocate("task".to_string()).expect("room");
        let live = collector.live_objects();
        assert_eq!(live, vec![ManagedObject { owner: 4, tag: "task".to_string(), address: addr }]);
        assert_eq!(live[0].to_string(), "task@0(node 4)");
    }
}
