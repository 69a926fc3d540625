use super::service::{StorageNode, remove_files};
use crate::membership::types::NodeId;
use crate::protocol::{ControlMessage, OpKind, Payload};
use crate::transfer::pull_file;

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const MAX_DATAGRAM: usize = 64 * 1024;

impl StorageNode {
    /// Receives control datagrams and routes them to their handler.
    pub(crate) async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, src) = match self.recv_datagram(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::error!("Control socket receive failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            if !self.is_active() {
                tracing::debug!("Node {} inactive, dropping datagram from {}", self.local_id(), src);
                continue;
            }

            match ControlMessage::from_datagram(&buf[..len]) {
                Ok(msg) => self.clone().dispatch(msg).await,
                Err(e) => {
                    tracing::warn!("Dropping malformed datagram from {}: {}", src, e);
                }
            }
        }
    }

    async fn dispatch(self: Arc<Self>, msg: ControlMessage) {
        tracing::debug!("Received {} for {} from {}", msg.payload.tag(), msg.name, msg.sender);

        match msg.payload.clone() {
            Payload::PutPrepare => {
                let timestamp = self.catalog.local_timestamp(&msg.name).unwrap_or(0);
                self.reply(&msg, Payload::PutAck { timestamp }).await;
            }

            Payload::PutCommit {
                replicas,
                timestamp,
            } => {
                tokio::spawn(async move {
                    self.handle_replica_commit(msg, replicas, timestamp, Payload::PutCommitAck)
                        .await;
                });
            }

            Payload::PutCommitRe {
                replicas,
                timestamp,
            } => {
                tokio::spawn(async move {
                    self.handle_replica_commit(msg, replicas, timestamp, Payload::AckRerep)
                        .await;
                });
            }

            Payload::DirInsert { replicas } => {
                self.catalog.learn_insert(&msg.name, replicas);
            }

            Payload::DirUpdate { replicas } => {
                if let Some(released) = self.catalog.learn_update(&msg.name, replicas, self.local_id()) {
                    tracing::info!("No longer a replica of {}, releasing local copy", msg.name);
                    remove_files([released]).await;
                }
            }

            Payload::DeleteRequest => {
                self.purge(&msg.name).await;
                self.reply(&msg, Payload::DeleteAck).await;
            }

            Payload::DirDelete => {
                self.purge(&msg.name).await;
            }

            Payload::GetQuery => match self.catalog.local_timestamp(&msg.name) {
                Some(timestamp) => self.reply(&msg, Payload::GetAck { timestamp }).await,
                None => {
                    tracing::debug!("GET_QUERY for {} but no local copy", msg.name);
                }
            },

            Payload::PutAck { timestamp } => {
                self.pending
                    .record(OpKind::PutPrepare, &msg.name, msg.sender, Some(timestamp));
            }
            Payload::PutCommitAck => {
                self.pending.record(OpKind::PutCommit, &msg.name, msg.sender, None);
            }
            Payload::GetAck { timestamp } => {
                self.pending
                    .record(OpKind::Get, &msg.name, msg.sender, Some(timestamp));
            }
            Payload::DeleteAck => {
                self.pending.record(OpKind::Delete, &msg.name, msg.sender, None);
            }
            Payload::AckRerep => {
                self.pending
                    .record(OpKind::ReReplicate, &msg.name, msg.sender, None);
            }
        }
    }

    /// Pulls the bytes from the sender, stores them and acknowledges.
    /// A failed pull is not acknowledged.
    async fn handle_replica_commit(
        &self,
        msg: ControlMessage,
        replicas: BTreeSet<NodeId>,
        timestamp: i64,
        ack: Payload,
    ) {
        match self.store_replica(&msg, replicas, timestamp).await {
            Ok(bytes) => {
                tracing::info!(
                    "Stored replica of {} ({} bytes, ts={}) from {}",
                    msg.name,
                    bytes,
                    timestamp,
                    msg.sender
                );
                self.reply(&msg, ack).await;
            }
            Err(e) => {
                tracing::error!("Failed to store replica of {} from {}: {:#}", msg.name, msg.sender, e);
            }
        }
    }

    async fn store_replica(
        &self,
        msg: &ControlMessage,
        replicas: BTreeSet<NodeId>,
        timestamp: i64,
    ) -> Result<u64> {
        let (source_id, transfer) = self
            .transfer_addr_of(msg.sender)
            .ok_or_else(|| anyhow::anyhow!("No slot owns control address {}", msg.sender))?;

        let dest = self.catalog.storage_path_for(&msg.name);
        tracing::debug!("Pulling {} from slot {} at {}", msg.name, source_id, transfer);
        let bytes = pull_file(transfer, &msg.name, &dest).await?;

        self.catalog.commit_replica(&msg.name, dest, replicas, timestamp);
        Ok(bytes)
    }

    async fn purge(&self, name: &str) {
        if let Some(path) = self.catalog.purge(name) {
            remove_files([path]).await;
        }
        tracing::debug!("Purged {}", name);
    }
}
