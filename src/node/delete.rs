use super::config::remote_quorum;
use super::service::{StorageNode, remove_files};
use super::types::{DeleteOutcome, NodeError};
use crate::protocol::{OpKind, Payload};

impl StorageNode {
    /// Removes `name` from every replica and then from every Directory.
    ///
    /// Replicas acknowledge after purging; once `delete_quorum` of them have
    /// (one fewer when this node is a replica) the coordinator purges itself
    /// and broadcasts `DIR_DELETE` to the remaining nodes.
    pub async fn delete(&self, name: &str) -> Result<DeleteOutcome, NodeError> {
        let _client = self.client_lock.lock().await;

        let Some(record) = self.catalog.record(name) else {
            tracing::info!("DELETE {}: not found", name);
            return Ok(DeleteOutcome::NotFound);
        };

        let is_replica = record.is_replica(self.local_id());
        let required = remote_quorum(self.config.delete_quorum, is_replica);
        tracing::info!("DELETE {} from {:?} (quorum={})", name, record.replicas, required);

        {
            let mut wait = self.pending.begin(OpKind::Delete, name, required)?;
            let request = self.message(name, Payload::DeleteRequest);
            self.send_to_remote_replicas(&record.replicas, &request).await;
            wait.wait(self.config.quorum_timeout).await?;
        }

        if let Some(path) = self.catalog.purge(name) {
            remove_files([path]).await;
        }

        let announce = self.message(name, Payload::DirDelete);
        self.broadcast_except(&record.replicas, &announce).await;

        tracing::info!("DELETE {} completed", name);
        Ok(DeleteOutcome::Deleted)
    }
}
