//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashSet;

use cohort_core::MutexStatus;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// At most one node is ever in the critical section.
///
/// Recorded intervals must not overlap: every entry except the last has
/// left before the next one entered. The live status view must agree.
pub struct MutualExclusionSafety;

impl Invariant for MutualExclusionSafety {
    fn name(&self) -> &'static str {
        "mutual_exclusion_safety"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for pair in state.entries.windows(2) {
            let (earlier, later) = (&pair[0], &pair[1]);
            match earlier.left_at {
                Some(left) if left <= later.entered_at => {},
                _ => {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "node {} entered at step {} while node {} held the section since step {}",
                            later.node, later.entered_at, earlier.node, earlier.entered_at
                        ),
                    });
                },
            }
        }

        let inside: Vec<_> = state
            .nodes
            .iter()
            .filter(|n| n.mutex_status == MutexStatus::InCriticalSection)
            .map(|n| n.id)
            .collect();
        if inside.len() > 1 {
            return Err(Violation {
                invariant: self.name(),
                message: format!("nodes {inside:?} are in the critical section together"),
            });
        }
        Ok(())
    }
}

/// A node's clock never moves backwards.
///
/// Successive readings must be ordered by the causal `<=`, which also rules
/// out a clock changing kind or length.
pub struct ClockMonotonicity;

impl Invariant for ClockMonotonicity {
    fn name(&self) -> &'static str {
        "clock_monotonicity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for node in &state.nodes {
            for window in node.clock_history.windows(2) {
                if !window[0].partial_le(&window[1]) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "node {}: clock went from {} to {}",
                            node.id, window[0], window[1]
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every completed global snapshot is a consistent cut.
pub struct SnapshotConsistency;

impl Invariant for SnapshotConsistency {
    fn name(&self) -> &'static str {
        "snapshot_consistency"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for snapshot in &state.snapshots {
            if !state.nodes.is_empty() && snapshot.states.len() != state.nodes.len() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "round {}: {} of {} nodes recorded",
                        snapshot.round,
                        snapshot.states.len(),
                        state.nodes.len()
                    ),
                });
            }
            snapshot.verify().map_err(|message| Violation {
                invariant: self.name(),
                message: format!("round {}: {message}", snapshot.round),
            })?;
        }
        Ok(())
    }
}

/// Global termination is announced at most once, and only when it is true.
pub struct TerminationSafety;

impl Invariant for TerminationSafety {
    fn name(&self) -> &'static str {
        "termination_safety"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let Some(record) = &state.termination else {
            return Ok(());
        };

        if record.signals > 1 {
            return Err(Violation {
                invariant: self.name(),
                message: format!("node {} signalled termination {} times", record.node, record.signals),
            });
        }

        if let Some(busy) = state.nodes.iter().find(|n| n.active || n.engaged) {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "termination signalled at step {} but node {} is still {}",
                    record.step,
                    busy.id,
                    if busy.active { "active" } else { "engaged" }
                ),
            });
        }
        Ok(())
    }
}

/// Live objects have unique addresses that fit their arena.
pub struct HeapIntegrity;

impl Invariant for HeapIntegrity {
    fn name(&self) -> &'static str {
        "heap_integrity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for node in &state.nodes {
            let mut seen = HashSet::new();
            for object in &node.heap {
                if object.owner != node.id {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("node {} holds {object} owned by another node", node.id),
                    });
                }
                if !seen.insert(object.address) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("node {}: address {} used twice", node.id, object.address),
                    });
                }
                if let Some(capacity) = node.heap_capacity {
                    if object.address >= capacity {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "node {}: {object} outside arena of {capacity}",
                                node.id
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cohort_core::{CriticalSectionEntry, LogicalClock, ManagedObject, TerminationRecord};

    use super::*;
    use crate::NodeSnapshot;

    fn entry(node: u32, entered_at: u64, left_at: Option<u64>) -> CriticalSectionEntry {
        CriticalSectionEntry { node, entered_at, left_at, clock: LogicalClock::Scalar(0) }
    }

    #[test]
    fn overlapping_entries_violate_mutual_exclusion() {
        let mut state = SystemSnapshot::empty();
        state.entries = vec![entry(0, 1, Some(5)), entry(1, 3, None)];
        let violation = MutualExclusionSafety.check(&state).expect_err("overlap");
        assert_eq!(violation.invariant, "mutual_exclusion_safety");
    }

    #[test]
    fn sequential_entries_pass() {
        let mut state = SystemSnapshot::empty();
        state.entries = vec![entry(0, 1, Some(5)), entry(1, 5, Some(8)), entry(2, 9, None)];
        assert!(MutualExclusionSafety.check(&state).is_ok());
    }

    #[test]
    fn two_holders_violate_mutual_exclusion() {
        let state = SystemSnapshot::from_nodes(vec![
            NodeSnapshot::new(0).with_status(MutexStatus::InCriticalSection),
            NodeSnapshot::new(1).with_status(MutexStatus::InCriticalSection),
        ]);
        assert!(MutualExclusionSafety.check(&state).is_err());
    }

    #[test]
    fn backwards_clock_is_detected() {
        let node = NodeSnapshot::new(0)
            .with_clock(LogicalClock::Vector(vec![2, 1]))
            .with_clock(LogicalClock::Vector(vec![1, 3]));
        assert!(ClockMonotonicity.check(&SystemSnapshot::single(node)).is_err());
    }

    #[test]
    fn early_termination_is_detected() {
        let mut state = SystemSnapshot::from_nodes(vec![
            NodeSnapshot::new(0),
            NodeSnapshot::new(1).with_activity(true, true),
        ]);
        state.termination = Some(TerminationRecord { node: 0, step: 10, signals: 1 });
        assert!(TerminationSafety.check(&state).is_err());
    }

    #[test]
    fn repeated_termination_is_detected() {
        let mut state = SystemSnapshot::single(NodeSnapshot::new(0));
        state.termination = Some(TerminationRecord { node: 0, step: 10, signals: 2 });
        assert!(TerminationSafety.check(&state).is_err());
    }

    #[test]
    fn duplicate_address_is_detected() {
        let object = |address| ManagedObject { owner: 0, tag: "x".to_string(), address };
        let node = NodeSnapshot::new(0).with_heap(vec![object(1), object(1)], None);
        assert!(HeapIntegrity.check(&SystemSnapshot::single(node)).is_err());

        let node = NodeSnapshot::new(0).with_heap(vec![object(0), object(4)], Some(4));
        assert!(HeapIntegrity.check(&SystemSnapshot::single(node)).is_err());
    }
}
