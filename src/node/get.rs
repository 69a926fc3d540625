use super::service::StorageNode;
use super::types::{GetOutcome, NodeError};
use crate::protocol::{OpKind, Payload};
use crate::transfer::pull_file;

use std::path::Path;

impl StorageNode {
    /// Reads `name` into `local_path`.
    ///
    /// A local replica is returned as-is without touching the network.
    /// Otherwise the replicas are asked for their timestamps and the file is
    /// pulled from the freshest of the first `read_quorum` responders. A get
    /// never changes the Directory or LocalStore.
    pub async fn get(
        &self,
        name: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<GetOutcome, NodeError> {
        let _client = self.client_lock.lock().await;

        if let Some(path) = self.catalog.local_path(name) {
            tracing::info!("GET {} served from local replica", name);
            return Ok(GetOutcome::Local(path));
        }

        let Some(record) = self.catalog.record(name) else {
            tracing::info!("GET {}: not found", name);
            return Ok(GetOutcome::NotFound);
        };

        let outcome = {
            let mut wait = self
                .pending
                .begin(OpKind::Get, name, self.config.read_quorum)?;
            let query = self.message(name, Payload::GetQuery);
            self.send_to_remote_replicas(&record.replicas, &query).await;
            wait.wait(self.config.quorum_timeout).await?
        };

        let sender = outcome
            .best_sender
            .ok_or_else(|| NodeError::NoSource(name.to_string()))?;
        let (from, transfer) = self
            .transfer_addr_of(sender)
            .ok_or(NodeError::UnknownPeer(sender))?;

        let dest = local_path.as_ref().to_path_buf();
        tracing::info!(
            "GET {}: pulling ts={} from slot {}",
            name,
            outcome.max_timestamp,
            from
        );
        pull_file(transfer, name, &dest)
            .await
            .map_err(|e| NodeError::Transfer {
                name: name.to_string(),
                reason: format!("{:#}", e),
            })?;

        Ok(GetOutcome::Fetched {
            from,
            timestamp: outcome.max_timestamp,
            path: dest,
        })
    }
}
