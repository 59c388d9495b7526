//! Logical timestamps carried by every message.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// Which clock representation a network runs with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockKind {
    /// Lamport clock: a single counter.
    #[default]
    Scalar,
    /// Vector clock: one counter per process.
    Vector,
}

/// Snapshot of a process's logical clock.
///
/// # Invariants
///
/// - A vector clock's length equals the number of processes in the network
///   and index `i` is process `i`'s component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalClock {
    /// Lamport counter.
    Scalar(u64),
    /// Per-process counters indexed by [`NodeId`].
    Vector(Vec<u64>),
}

impl LogicalClock {
    /// Zeroed clock of the given kind for a network of `node_count` processes.
    pub fn zero(kind: ClockKind, node_count: usize) -> Self {
        match kind {
            ClockKind::Scalar => Self::Scalar(0),
            ClockKind::Vector => Self::Vector(vec![0; node_count]),
        }
    }

    /// Representation of this clock.
    pub fn kind(&self) -> ClockKind {
        match self {
            Self::Scalar(_) => ClockKind::Scalar,
            Self::Vector(_) => ClockKind::Vector,
        }
    }

    /// Component owned by `id`. A scalar clock has a single shared component.
    pub fn component(&self, id: NodeId) -> u64 {
        match self {
            Self::Scalar(value) => *value,
            Self::Vector(values) => values.get(id as usize).copied().unwrap_or(0),
        }
    }

    /// Scalar priority consistent with causality.
    ///
    /// If `a` happened before `b` then `a.priority() < b.priority()`. For a
    /// vector clock this is the component sum.
    pub fn priority(&self) -> u64 {
        match self {
            Self::Scalar(value) => *value,
            Self::Vector(values) => values.iter().fold(0u64, |acc, v| acc.saturating_add(*v)),
        }
    }

    /// `self <= other` in the causal order.
    ///
    /// Component-wise for vectors, numeric for scalars. Clocks of different
    /// kinds or lengths are never ordered.
    pub fn partial_le(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => a <= b,
            (Self::Vector(a), Self::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x <= y)
            },
            _ => false,
        }
    }

    /// `self` causally precedes `other` (less or equal, and not equal).
    pub fn happened_before(&self, other: &Self) -> bool {
        self != other && self.partial_le(other)
    }

    /// Neither clock precedes the other.
    pub fn concurrent_with(&self, other: &Self) -> bool {
        !self.partial_le(other) && !other.partial_le(self)
    }
}

impl fmt::Display for LogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => write!(f, "{value}"),
            Self::Vector(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_partial_order() {
        let a = LogicalClock::Vector(vec![1, 2, 0]);
        let b = LogicalClock::Vector(vec![2, 2, 1]);
        assert!(a.partial_le(&b));
        assert!(a.happened_before(&b));
        assert!(!b.partial_le(&a));
        assert!(!a.concurrent_with(&b));
    }

    #[test]
    fn vector_concurrency() {
        let a = LogicalClock::Vector(vec![2, 1]);
        let b = LogicalClock::Vector(vec![1, 2]);
        assert!(a.concurrent_with(&b));
        assert!(!a.happened_before(&b));
    }

    #[test]
    fn mismatched_clocks_are_unordered() {
        let scalar = LogicalClock::Scalar(3);
        let vector = LogicalClock::Vector(vec![3]);
        assert!(!scalar.partial_le(&vector));
        assert!(scalar.concurrent_with(&vector));

        let short = LogicalClock::Vector(vec![1]);
        let long = LogicalClock::Vector(vec![1, 1]);
        assert!(!short.partial_le(&long));
    }

    #[test]
    fn priority_is_component_sum() {
        assert_eq!(LogicalClock::Vector(vec![3, 4, 5]).priority(), 12);
        assert_eq!(LogicalClock::Scalar(9).priority(), 9);
    }

    #[test]
    fn display_formats() {
        assert_eq!(LogicalClock::Vector(vec![1, 0, 2]).to_string(), "[1, 0, 2]");
        assert_eq!(LogicalClock::Scalar(7).to_string(), "7");
    }

    #[test]
    fn zero_clock_has_node_count_components() {
        assert_eq!(LogicalClock::zero(ClockKind::Vector, 3), LogicalClock::Vector(vec![0, 0, 0]));
        assert_eq!(LogicalClock::zero(ClockKind::Scalar, 3), LogicalClock::Scalar(0));
    }
}
