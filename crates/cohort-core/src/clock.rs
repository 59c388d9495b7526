//! Per-node logical clock.
//!
//! The [`ClockService`] is the only writer of a node's clock. Every local
//! event, send and receive advances the node's own component; receives merge
//! the sender's timestamp first.

use cohort_proto::{ClockKind, LogicalClock, NodeId};
use serde::{Deserialize, Serialize};

use crate::error::ClockError;

/// How [`ClockService::synchronize`] combines the local clock with a master
/// time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPolicy {
    /// Berkeley-style: the master time is the average of all nodes' clocks.
    #[default]
    Average,
    /// The master time is the largest clock in the network.
    Maximum,
}

/// Logical clock owned by a single node.
///
/// # Invariants
///
/// - The own component never decreases.
/// - `tick`, `stamp` and a successful `update` strictly increase the own
///   component.
/// - A vector clock has exactly `node_count` components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockService {
    id: NodeId,
    clock: LogicalClock,
}

impl ClockService {
    /// Zeroed clock for node `id` in a network of `node_count` processes.
    pub fn new(id: NodeId, kind: ClockKind, node_count: usize) -> Self {
        debug_assert!((id as usize) < node_count.max(1));
        Self { id, clock: LogicalClock::zero(kind, node_count) }
    }

    /// Clock whose own component starts at `initial`.
    pub fn with_initial(id: NodeId, kind: ClockKind, node_count: usize, initial: u64) -> Self {
        let mut service = Self::new(id, kind, node_count);
        service.set_own(initial);
        service
    }

    /// Current clock value.
    pub fn current(&self) -> &LogicalClock {
        &self.clock
    }

    /// Own component.
    pub fn own(&self) -> u64 {
        self.clock.component(self.id)
    }

    /// Representation in use.
    pub fn kind(&self) -> ClockKind {
        self.clock.kind()
    }

    /// Local event.
    pub fn tick(&mut self) {
        let before = self.own();
        match &mut self.clock {
            LogicalClock::Scalar(value) => *value = value.saturating_add(1),
            LogicalClock::Vector(values) => {
                if let Some(own) = values.get_mut(self.id as usize) {
                    *own = own.saturating_add(1);
                }
            },
        }
        debug_assert!(self.own() > before || before == u64::MAX);
    }

    /// Send event: tick, then return the timestamp to attach.
    pub fn stamp(&mut self) -> LogicalClock {
        self.tick();
        self.clock.clone()
    }

    /// Receive event: merge `incoming`, then tick.
    ///
    /// # Errors
    ///
    /// - `Mismatch` if `incoming` has a different kind or vector length. The
    ///   clock is left unchanged.
    pub fn update(&mut self, incoming: &LogicalClock) -> Result<(), ClockError> {
        match (&mut self.clock, incoming) {
            (LogicalClock::Scalar(local), LogicalClock::Scalar(remote)) => {
                *local = (*local).max(*remote);
            },
            (LogicalClock::Vector(local), LogicalClock::Vector(remote))
                if local.len() == remote.len() =>
            {
                for (mine, theirs) in local.iter_mut().zip(remote) {
                    *mine = (*mine).max(*theirs);
                }
            },
            _ => {
                return Err(ClockError::Mismatch {
                    expected: describe(&self.clock),
                    actual: describe(incoming),
                });
            },
        }
        self.tick();
        Ok(())
    }

    /// Adopt `master` for the own component without moving backwards.
    ///
    /// Returns the adjustment applied.
    pub fn synchronize(&mut self, master: u64) -> u64 {
        let own = self.own();
        if master <= own {
            return 0;
        }
        self.set_own(master);
        master - own
    }

    /// Vector partial order: `a` causally precedes `b`.
    pub fn happened_before(a: &LogicalClock, b: &LogicalClock) -> bool {
        a.happened_before(b)
    }

    /// Neither clock causally precedes the other.
    pub fn concurrent(a: &LogicalClock, b: &LogicalClock) -> bool {
        a.concurrent_with(b)
    }

    fn set_own(&mut self, value: u64) {
        match &mut self.clock {
            LogicalClock::Scalar(v) => *v = value,
            LogicalClock::Vector(values) => {
                if let Some(own) = values.get_mut(self.id as usize) {
                    *own = value;
                }
            },
        }
    }
}

fn describe(clock: &LogicalClock) -> String {
    match clock {
        LogicalClock::Scalar(_) => "scalar".to_string(),
        LogicalClock::Vector(v) => format!("vector[{}]", v.len()),
    }
}

/// Master time for a set of own-component readings.
pub fn master_time(policy: SyncPolicy, readings: &[u64]) -> u64 {
    if readings.is_empty() {
        return 0;
    }
    match policy {
        SyncPolicy::Average => {
            let sum: u128 = readings.iter().map(|r| u128::from(*r)).sum();
            u64::try_from(sum / readings.len() as u128).unwrap_or(u64::MAX)
        },
        SyncPolicy::Maximum => readings.iter().copied().max().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_update_takes_max_plus_one() {
        let mut clock = ClockService::with_initial(0, ClockKind::Scalar, 2, 3);
        clock.update(&LogicalClock::Scalar(10)).expect("same kind");
        assert_eq!(clock.current(), &LogicalClock::Scalar(11));

        clock.update(&LogicalClock::Scalar(2)).expect("same kind");
        assert_eq!(clock.current(), &LogicalClock::Scalar(12));
    }

    #[test]
    fn vector_update_merges_then_ticks_own() {
        let mut clock = ClockService::new(1, ClockKind::Vector, 3);
        clock.tick();
        clock.update(&LogicalClock::Vector(vec![4, 0, 2])).expect("same length");
        assert_eq!(clock.current(), &LogicalClock::Vector(vec![4, 2, 2]));
    }

    #[test]
    fn stamp_is_a_send_event() {
        let mut clock = ClockService::new(2, ClockKind::Vector, 3);
        let ts = clock.stamp();
        assert_eq!(ts, LogicalClock::Vector(vec![0, 0, 1]));
        assert_eq!(clock.own(), 1);
    }

    #[test]
    fn mismatched_timestamp_leaves_clock_unchanged() {
        let mut clock = ClockService::new(0, ClockKind::Vector, 3);
        let before = clock.current().clone();

        let err = clock.update(&LogicalClock::Vector(vec![1, 1])).unwrap_err();
        assert!(matches!(err, ClockError::Mismatch { .. }));
        assert_eq!(clock.current(), &before);

        assert!(clock.update(&LogicalClock::Scalar(5)).is_err());
        assert_eq!(clock.current(), &before);
    }

    #[test]
    fn synchronize_never_moves_backwards() {
        let mut clock = ClockService::with_initial(0, ClockKind::Scalar, 1, 20);
        assert_eq!(clock.synchronize(12), 0);
        assert_eq!(clock.own(), 20);
        assert_eq!(clock.synchronize(25), 5);
        assert_eq!(clock.own(), 25);
    }

    #[test]
    fn master_time_policies() {
        assert_eq!(master_time(SyncPolicy::Average, &[3, 9, 12]), 8);
        assert_eq!(master_time(SyncPolicy::Maximum, &[3, 9, 12]), 12);
        assert_eq!(master_time(SyncPolicy::Average, &[]), 0);
    }

    #[test]
    fn send_happens_before_receive() {
        let mut a = ClockService::new(0, ClockKind::Vector, 2);
        let mut b = ClockService::new(1, ClockKind::Vector, 2);
        b.tick();

        let sent = a.stamp();
        b.update(&sent).expect("same length");
        assert!(ClockService::happened_before(&sent, b.current()));

        let mut c = ClockService::new(0, ClockKind::Vector, 2);
        c.tick();
        let mut d = ClockService::new(1, ClockKind::Vector, 2);
        d.tick();
        assert!(ClockService::concurrent(c.current(), d.current()));
    }
}
