use crate::membership::types::{Membership, NodeId};

use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("only {active} active nodes, {required} required")]
    InsufficientActiveNodes { active: usize, required: usize },
}

pub struct PlacementOracle {
    replication_factor: usize,
    membership: Arc<dyn Membership>,
}

impl PlacementOracle {
    pub fn new(membership: Arc<dyn Membership>, replication_factor: usize) -> Self {
        Self {
            replication_factor,
            membership,
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn ring_size(&self) -> u16 {
        self.membership.all_ids().len() as u16
    }

    /// Ring index of a name, in `1..=N`.
    pub fn hash(&self, name: &str) -> NodeId {
        ring_index(name, self.ring_size())
    }

    /// The first R active slots clockwise from `hash(name)`.
    ///
    /// The walk covers the ring once; fewer than R active slots is an error
    /// instead of a spin.
    pub fn initial_replicas(&self, name: &str) -> Result<BTreeSet<NodeId>, PlacementError> {
        let size = self.ring_size();
        let mut replicas = BTreeSet::new();
        let mut index = self.hash(name).0;

        for _ in 0..size {
            if self.membership.is_active(NodeId(index)) {
                replicas.insert(NodeId(index));
                if replicas.len() == self.replication_factor {
                    return Ok(replicas);
                }
            }
            index = next_on_ring(index, size);
        }

        Err(PlacementError::InsufficientActiveNodes {
            active: replicas.len(),
            required: self.replication_factor,
        })
    }

    /// First active slot after `max(current)` that is not in `current`.
    pub fn next_replacement(&self, current: &BTreeSet<NodeId>) -> Option<NodeId> {
        let size = self.ring_size();
        let start = current.iter().max().map(|id| id.0).unwrap_or(size);
        let mut index = next_on_ring(start, size);

        for _ in 0..size {
            let candidate = NodeId(index);
            if !current.contains(&candidate) && self.membership.is_active(candidate) {
                return Some(candidate);
            }
            index = next_on_ring(index, size);
        }

        None
    }
}

/// 31-multiplier polynomial hash in wrapping 32-bit signed arithmetic.
pub fn string_hash(name: &str) -> i32 {
    name.bytes()
        .fold(0i32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as i32))
}

pub fn ring_index(name: &str, ring_size: u16) -> NodeId {
    if ring_size == 0 {
        return NodeId(1);
    }
    let reduced = string_hash(name).unsigned_abs() % ring_size as u32;
    NodeId(reduced as u16 + 1)
}

fn next_on_ring(index: u16, size: u16) -> u16 {
    if index >= size { 1 } else { index + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::roster::StaticRoster;
    use crate::membership::types::{Endpoints, NodeStatus};
    use std::net::SocketAddr;

    fn roster(size: u16) -> Arc<StaticRoster> {
        Arc::new(StaticRoster::new(
            NodeId(1),
            (1..=size).map(|id| {
                let addr = SocketAddr::from(([127, 0, 0, 1], 30000 + id));
                (
                    NodeId(id),
                    Endpoints {
                        control: addr,
                        transfer: addr,
                    },
                )
            }),
        ))
    }

    fn set(ids: &[u16]) -> BTreeSet<NodeId> {
        ids.iter().map(|id| NodeId(*id)).collect()
    }

    // ============================================================
    // HASHING
    // ============================================================

    #[test]
    fn test_string_hash_matches_polynomial() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("x"), 120);
        assert_eq!(string_hash("foo"), 101574);
        assert_eq!(string_hash("a.txt"), 91067235);
    }

    #[test]
    fn test_string_hash_wraps_negative() {
        // 1930233420 fits in i32; a longer name overflows and must still land on the ring.
        assert_eq!(string_hash("report.csv"), 1930233420);
        let index = ring_index("a-rather-long-file-name-that-overflows.bin", 10);
        assert!((1..=10).contains(&index.0));
    }

    #[test]
    fn test_ring_index_is_one_based() {
        assert_eq!(ring_index("x", 10), NodeId(1));
        assert_eq!(ring_index("foo", 10), NodeId(5));
        assert_eq!(ring_index("a.txt", 10), NodeId(6));
        assert_eq!(ring_index("hello.txt", 10), NodeId(9));
    }

    #[test]
    fn test_hash_is_deterministic() {
        let oracle = PlacementOracle::new(roster(10), 4);
        for i in 0..500 {
            let name = format!("file_{}.dat", i);
            let h = oracle.hash(&name);
            assert_eq!(h, oracle.hash(&name));
            assert!((1..=10).contains(&h.0));
        }
    }

    // ============================================================
    // INITIAL REPLICAS
    // ============================================================

    #[test]
    fn test_initial_replicas_walk_forward() {
        let oracle = PlacementOracle::new(roster(10), 4);

        assert_eq!(oracle.initial_replicas("a.txt").unwrap(), set(&[6, 7, 8, 9]));
        assert_eq!(
            oracle.initial_replicas("hello.txt").unwrap(),
            set(&[9, 10, 1, 2])
        );
    }

    #[test]
    fn test_initial_replicas_skip_inactive() {
        let membership = roster(10);
        membership.set_status(NodeId(7), NodeStatus::Inactive);
        membership.set_status(NodeId(9), NodeStatus::Inactive);
        let oracle = PlacementOracle::new(membership, 4);

        assert_eq!(oracle.initial_replicas("a.txt").unwrap(), set(&[6, 8, 10, 1]));
    }

    #[test]
    fn test_initial_replicas_deterministic_size() {
        let oracle = PlacementOracle::new(roster(10), 4);
        for i in 0..200 {
            let name = format!("doc-{}", i);
            let first = oracle.initial_replicas(&name).unwrap();
            assert_eq!(first.len(), 4);
            assert_eq!(first, oracle.initial_replicas(&name).unwrap());
        }
    }

    #[test]
    fn test_initial_replicas_insufficient_nodes() {
        let membership = roster(10);
        for id in 1..=7 {
            membership.set_status(NodeId(id), NodeStatus::Inactive);
        }
        let oracle = PlacementOracle::new(membership, 4);

        assert_eq!(
            oracle.initial_replicas("a.txt"),
            Err(PlacementError::InsufficientActiveNodes {
                active: 3,
                required: 4
            })
        );
    }

    // ============================================================
    // NEXT REPLACEMENT
    // ============================================================

    #[test]
    fn test_next_replacement_starts_after_max() {
        let oracle = PlacementOracle::new(roster(10), 4);

        assert_eq!(oracle.next_replacement(&set(&[1, 3, 5])), Some(NodeId(6)));
        assert_eq!(oracle.next_replacement(&set(&[6, 8, 9])), Some(NodeId(10)));
    }

    #[test]
    fn test_next_replacement_wraps() {
        let membership = roster(10);
        membership.set_status(NodeId(10), NodeStatus::Inactive);
        membership.set_status(NodeId(1), NodeStatus::Inactive);
        let oracle = PlacementOracle::new(membership, 4);

        assert_eq!(oracle.next_replacement(&set(&[6, 8, 9])), Some(NodeId(2)));
    }

    #[test]
    fn test_next_replacement_skips_members() {
        let oracle = PlacementOracle::new(roster(10), 4);

        assert_eq!(oracle.next_replacement(&set(&[10, 1, 2])), Some(NodeId(3)));
    }

    #[test]
    fn test_next_replacement_none_available() {
        let membership = roster(4);
        membership.set_status(NodeId(4), NodeStatus::Inactive);
        let oracle = PlacementOracle::new(membership, 4);

        assert_eq!(oracle.next_replacement(&set(&[1, 2, 3])), None);
    }
}
