use crate::membership::types::NodeId;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Cluster-wide metadata of one stored file.
///
/// Every node holds one of these for every file it has heard of, whether or
/// not it stores the bytes. Only the coordinator of the latest write holds an
/// authoritative copy; all others are learned and may lag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    /// Slots designated to hold the bytes, in ascending order.
    pub replicas: BTreeSet<NodeId>,
    /// Commit time in ms since the Unix epoch. `0` when the record was learned
    /// from a metadata broadcast and no commit was observed locally.
    pub timestamp: i64,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, replicas: BTreeSet<NodeId>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            replicas,
            timestamp,
        }
    }

    pub fn is_replica(&self, id: NodeId) -> bool {
        self.replicas.contains(&id)
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
