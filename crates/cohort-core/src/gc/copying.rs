//! Cheney semispace collector.
//!
//! Two arenas of `capacity` slots. Allocation bumps a free pointer in
//! from-space. A collection copies every unreleased object, in slot order,
//! into a cleared to-space, then flips the spaces. Live objects end up packed
//! at addresses `0..live`.

use cohort_proto::NodeId;

use super::{Address, CollectionKind, CollectionReport, Collector, CollectorStrategy, ManagedObject};
use crate::error::GcError;

#[derive(Debug, Clone)]
struct Slot {
    object: ManagedObject,
    released: bool,
}

/// Copying collector with a fixed arena.
///
/// # Invariants
///
/// - `free <= capacity`
/// - Slots `0..free` of from-space are occupied, the rest are empty
/// - After a collection, no released object remains
#[derive(Debug)]
pub struct CopyingCollector {
    owner: NodeId,
    capacity: usize,
    from_space: Vec<Option<Slot>>,
    to_space: Vec<Option<Slot>>,
    free: usize,
    collections: u64,
}

impl CopyingCollector {
    /// Collector for `owner` with `capacity` slots per space.
    pub fn new(owner: NodeId, capacity: usize) -> Self {
        Self {
            owner,
            capacity,
            from_space: vec![None; capacity],
            to_space: vec![None; capacity],
            free: 0,
            collections: 0,
        }
    }

    /// Slots per semispace.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Next free slot in from-space.
    pub fn free_pointer(&self) -> usize {
        self.free
    }

    fn live_count(&self) -> usize {
        self.from_space.iter().flatten().filter(|s| !s.released).count()
    }
}

impl Collector for CopyingCollector {
    fn allocate(&mut self, tag: String) -> Result<Address, GcError> {
        if self.free >= self.capacity {
            tracing::debug!(node = self.owner, capacity = self.capacity, "arena full, collecting");
            self.collect();
        }
        if self.free >= self.capacity {
            let live = self.live_count();
            tracing::warn!(node = self.owner, capacity = self.capacity, live, "out of memory");
            return Err(GcError::OutOfMemory { capacity: self.capacity, live });
        }

        let address = self.free;
        self.from_space[address] =
            Some(Slot { object: ManagedObject { owner: self.owner, tag, address }, released: false });
        self.free += 1;
        Ok(address)
    }

    fn release(&mut self, address: Address) -> Result<(), GcError> {
        match self.from_space.get_mut(address) {
            Some(Some(slot)) if !slot.released => {
                slot.released = true;
                Ok(())
            },
            _ => Err(GcError::InvalidAddress(address)),
        }
    }

    fn collect(&mut self) -> CollectionReport {
        let mut report = CollectionReport::new(CollectionKind::Copy);
        let live_before = self.live_count();

        self.to_space.iter_mut().for_each(|slot| *slot = None);
        let mut scan = 0;
        for slot in self.from_space.iter_mut().take(self.free) {
            match slot.take() {
                Some(mut moved) if !moved.released => {
                    let old = moved.object.address;
                    moved.object.address = scan;
                    report.relocations.push((old, scan));
                    self.to_space[scan] = Some(moved);
                    scan += 1;
                },
                Some(_) => report.reclaimed += 1,
                None => {},
            }
        }

        std::mem::swap(&mut self.from_space, &mut self.to_space);
        self.free = scan;
        self.collections += 1;
        report.live = scan;

        debug_assert_eq!(report.live, live_before);
        debug_assert!(self.from_space[..self.free].iter().all(Option::is_some));

        tracing::debug!(
            node = self.owner,
            reclaimed = report.reclaimed,
            live = report.live,
            "semispace flip"
        );
        report
    }

    fn live_objects(&self) -> Vec<ManagedObject> {
        self.from_space
            .iter()
            .flatten()
            .filter(|s| !s.released)
            .map(|s| s.object.clone())
            .collect()
    }

    fn collections(&self) -> u64 {
        self.collections
    }

    fn strategy(&self) -> CollectorStrategy {
        CollectorStrategy::Copying { capacity: self.capacity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(gc: &mut CopyingCollector, tag: &str) -> Result<Address, GcError> {
        gc.allocate(tag.to_string())
    }

    #[test]
    fn collect_packs_live_objects_from_zero() {
        let mut gc = CopyingCollector::new(1, 6);
        for i in 0..6 {
            alloc(&mut gc, &format!("o{i}")).expect("room");
        }
        gc.release(0).expect("live");
        gc.release(3).expect("live");

        let report = gc.collect();
        assert_eq!(report.reclaimed, 2);
        assert_eq!(report.live, 4);
        assert_eq!(report.relocations, vec![(1, 0), (2, 1), (4, 2), (5, 3)]);

        let tags: Vec<String> = gc.live_objects().into_iter().map(|o| o.tag).collect();
        assert_eq!(tags, vec!["o1", "o2", "o4", "o5"]);
        assert_eq!(gc.free_pointer(), 4);
    }

    #[test]
    fn full_arena_collects_automatically() {
        let mut gc = CopyingCollector::new(0, 4);
        for i in 0..4 {
            alloc(&mut gc, &format!("o{i}")).expect("room");
        }
        gc.release(2).expect("live");

        let addr = alloc(&mut gc, "o4").expect("collection frees a slot");
        assert_eq!(addr, 3);
        assert_eq!(gc.collections(), 1);

        let addrs: Vec<Address> = gc.live_objects().iter().map(|o| o.address).collect();
        assert_eq!(addrs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn full_arena_of_live_objects_is_out_of_memory() {
        let mut gc = CopyingCollector::new(0, 4);
        for i in 0..4 {
            alloc(&mut gc, &format!("o{i}")).expect("room");
        }

        assert_eq!(alloc(&mut gc, "o4"), Err(GcError::OutOfMemory { capacity: 4, live: 4 }));
        assert_eq!(gc.live_objects().len(), 4);
    }

    #[test]
    fn release_after_flip_uses_new_addresses() {
        let mut gc = CopyingCollector::new(0, 3);
        alloc(&mut gc, "a").expect("room");
        alloc(&mut gc, "b").expect("room");
        gc.release(0).expect("live");
        gc.collect();

        assert_eq!(gc.release(1), Err(GcError::InvalidAddress(1)));
        gc.release(0).expect("b moved to 0");
    }

    #[test]
    fn zero_capacity_arena_never_allocates() {
        let mut gc = CopyingCollector::new(0, 0);
        assert_eq!(alloc(&mut gc, "x"), Err(GcError::OutOfMemory { capacity: 0, live: 0 }));
    }
}
