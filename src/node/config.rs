use std::path::PathBuf;
use std::time::Duration;

/// Tunables of a storage node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// R: size of every replica set.
    pub replication_factor: usize,
    /// Put acks required when the coordinator is not a replica.
    pub write_quorum: usize,
    /// Get acks required before choosing the freshest responder.
    pub read_quorum: usize,
    /// Delete acks required when the coordinator is not a replica.
    pub delete_quorum: usize,
    /// A put observing a write newer than this asks the conflict policy first.
    pub conflict_window: Duration,
    pub rereplication_interval: Duration,
    /// How long a re-replication push waits for `ACK_REREP` before resending.
    pub rerep_ack_interval: Duration,
    /// How long a non-replica coordinator keeps serving a committed put source
    /// to replicas that are still pulling.
    pub staged_source_grace: Duration,
    /// `None` waits for a quorum forever.
    pub quorum_timeout: Option<Duration>,
    pub storage_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            replication_factor: 4,
            write_quorum: 3,
            read_quorum: 3,
            delete_quorum: 3,
            conflict_window: Duration::from_secs(60),
            rereplication_interval: Duration::from_millis(500),
            rerep_ack_interval: Duration::from_secs(2),
            staged_source_grace: Duration::from_secs(30),
            quorum_timeout: None,
            storage_dir: PathBuf::from("storage"),
        }
    }
}

impl NodeConfig {
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_quorum_timeout(mut self, timeout: Duration) -> Self {
        self.quorum_timeout = Some(timeout);
        self
    }
}

/// The coordinator counts as one of the quorum when it holds a replica itself.
pub(crate) fn remote_quorum(base: usize, coordinator_is_replica: bool) -> usize {
    if coordinator_is_replica {
        base.saturating_sub(1)
    } else {
        base
    }
}
