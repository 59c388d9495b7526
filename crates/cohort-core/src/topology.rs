//! Neighbor relations between nodes.
//!
//! The topology constrains application traffic and snapshot markers. Control
//! traffic for mutual exclusion and termination may go to any node.

use std::collections::{BTreeSet, VecDeque};

use cohort_proto::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// Shape of the neighbor graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// Every node neighbors every other node
    #[default]
    Complete,
    /// `i` neighbors `i - 1` and `i + 1` modulo the node count
    Ring,
    /// `i` neighbors `i - 1` and `i + 1` where they exist
    Line,
    /// Every node neighbors `center` only
    Star {
        /// Hub node
        center: NodeId,
    },
    /// Explicit adjacency lists, indexed by node id
    Custom(Vec<Vec<NodeId>>),
}

impl Topology {
    /// Adjacency lists for `node_count` nodes, sorted and deduplicated.
    ///
    /// # Errors
    ///
    /// - `InvalidCenter` for a star whose center is out of range
    /// - Any validation error for a custom topology
    pub fn neighbors(&self, node_count: usize) -> Result<Vec<Vec<NodeId>>, TopologyError> {
        let ids: Vec<NodeId> = (0..node_count).filter_map(|i| NodeId::try_from(i).ok()).collect();
        let n = ids.len();

        let lists: Vec<BTreeSet<NodeId>> = match self {
            Self::Complete => {
                ids.iter().map(|i| ids.iter().copied().filter(|j| j != i).collect()).collect()
            },
            Self::Ring => ids
                .iter()
                .map(|&i| {
                    let idx = i as usize;
                    [(idx + n - 1) % n, (idx + 1) % n]
                        .into_iter()
                        .filter(|j| *j != idx)
                        .map(|j| ids[j])
                        .collect()
                })
                .collect(),
            Self::Line => ids
                .iter()
                .map(|&i| {
                    let idx = i as usize;
                    [idx.checked_sub(1), Some(idx + 1).filter(|j| *j < n)]
                        .into_iter()
                        .flatten()
                        .map(|j| ids[j])
                        .collect()
                })
                .collect(),
            Self::Star { center } => {
                if *center as usize >= n {
                    return Err(TopologyError::InvalidCenter { center: *center, node_count });
                }
                ids.iter()
                    .map(|&i| {
                        if i == *center {
                            ids.iter().copied().filter(|j| j != center).collect()
                        } else {
                            BTreeSet::from([*center])
                        }
                    })
                    .collect()
            },
            Self::Custom(lists) => {
                validate_custom(lists, n)?;
                lists.iter().map(|l| l.iter().copied().collect()).collect()
            },
        };

        Ok(lists.into_iter().map(|l| l.into_iter().collect()).collect())
    }
}

fn validate_custom(lists: &[Vec<NodeId>], n: usize) -> Result<(), TopologyError> {
    if lists.len() != n {
        return Err(TopologyError::WrongSize { expected: n, actual: lists.len() });
    }

    for (i, list) in lists.iter().enumerate() {
        let node = NodeId::try_from(i).unwrap_or(NodeId::MAX);
        for &neighbor in list {
            if neighbor as usize >= n {
                return Err(TopologyError::UnknownNeighbor { node, neighbor });
            }
            if neighbor == node {
                return Err(TopologyError::SelfLoop(node));
            }
            if !lists[neighbor as usize].contains(&node) {
                return Err(TopologyError::Asymmetric { a: node, b: neighbor });
            }
        }
    }

    let mut seen = vec![false; n];
    let mut frontier = VecDeque::from([0usize]);
    if n > 0 {
        seen[0] = true;
    }
    while let Some(current) = frontier.pop_front() {
        for &next in lists.get(current).into_iter().flatten() {
            let next = next as usize;
            if !seen[next] {
                seen[next] = true;
                frontier.push_back(next);
            }
        }
    }
    match seen.iter().position(|s| !s) {
        Some(unreachable) => {
            Err(TopologyError::Disconnected(NodeId::try_from(unreachable).unwrap_or(NodeId::MAX)))
        },
        None => Ok(()),
    }
}
