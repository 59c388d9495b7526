//! Two-generation collector.
//!
//! New objects land in the young list. A minor collection drops released
//! young objects, keeps the first `young_threshold` survivors (allocation
//! order) young and promotes the rest. Old objects are only swept by a full
//! collection.

use std::collections::HashSet;

use cohort_proto::NodeId;

use super::{Address, CollectionKind, CollectionReport, Collector, CollectorStrategy, ManagedObject};
use crate::error::GcError;

/// Generational collector with stable addresses.
#[derive(Debug)]
pub struct GenerationalCollector {
    owner: NodeId,
    young_threshold: usize,
    young: Vec<ManagedObject>,
    old: Vec<ManagedObject>,
    released: HashSet<Address>,
    next_address: Address,
    collections: u64,
}

impl GenerationalCollector {
    /// Collector for `owner`.
    pub fn new(owner: NodeId, young_threshold: usize) -> Self {
        Self {
            owner,
            young_threshold,
            young: Vec::new(),
            old: Vec::new(),
            released: HashSet::new(),
            next_address: 0,
            collections: 0,
        }
    }

    /// Objects in the young generation, released or not.
    pub fn young_len(&self) -> usize {
        self.young.len()
    }

    /// Objects in the old generation, released or not.
    pub fn old_len(&self) -> usize {
        self.old.len()
    }

    fn contains(&self, address: Address) -> bool {
        self.young.iter().chain(&self.old).any(|o| o.address == address)
    }

    fn minor(&mut self, report: &mut CollectionReport) {
        let before = self.young.len();
        let released = &mut self.released;
        let mut survivors: Vec<ManagedObject> =
            self.young.drain(..).filter(|o| !released.remove(&o.address)).collect();
        report.reclaimed += before - survivors.len();

        if survivors.len() > self.young_threshold {
            let promoted = survivors.split_off(self.young_threshold);
            report.promoted = promoted.len();
            self.old.extend(promoted);
        }
        self.young = survivors;
    }
}

impl Collector for GenerationalCollector {
    fn allocate(&mut self, tag: String) -> Result<Address, GcError> {
        let address = self.next_address;
        self.next_address += 1;
        self.young.push(ManagedObject { owner: self.owner, tag, address });
        Ok(address)
    }

    fn release(&mut self, address: Address) -> Result<(), GcError> {
        if !self.contains(address) || self.released.contains(&address) {
            return Err(GcError::InvalidAddress(address));
        }
        self.released.insert(address);
        Ok(())
    }

    fn collect(&mut self) -> CollectionReport {
        let mut report = CollectionReport::new(CollectionKind::Minor);
        self.minor(&mut report);
        self.collections += 1;
        report.live = self.young.len() + self.old.len() - self.released.len();

        tracing::debug!(
            node = self.owner,
            reclaimed = report.reclaimed,
            promoted = report.promoted,
            young = self.young.len(),
            old = self.old.len(),
            "minor collection"
        );
        report
    }

    fn collect_full(&mut self) -> CollectionReport {
        let mut report = CollectionReport::new(CollectionKind::Full);
        self.minor(&mut report);

        let before = self.old.len();
        let released = &mut self.released;
        self.old.retain(|o| !released.remove(&o.address));
        report.reclaimed += before - self.old.len();
        self.collections += 1;

        debug_assert!(self.released.is_empty());
        report.live = self.young.len() + self.old.len();

        tracing::debug!(
            node = self.owner,
            reclaimed = report.reclaimed,
            promoted = report.promoted,
            live = report.live,
            "full collection"
        );
        report
    }

    fn live_objects(&self) -> Vec<ManagedObject> {
        let mut live: Vec<ManagedObject> = self
            .young
            .iter()
            .chain(&self.old)
            .filter(|o| !self.released.contains(&o.address))
            .cloned()
            .collect();
        live.sort_by_key(|o| o.address);
        live
    }

    fn collections(&self) -> u64 {
        self.collections
    }

    fn strategy(&self) -> CollectorStrategy {
        CollectorStrategy::Generational { young_threshold: self.young_threshold }
    }
}
