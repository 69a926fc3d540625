use super::config::remote_quorum;
use super::service::StorageNode;
use super::types::{ConflictDecision, NodeError, PutOutcome};
use crate::directory::{Catalog, now_ms};
use crate::protocol::{OpKind, Payload};
use crate::transfer::partial_path;

use std::path::{Path, PathBuf};

impl StorageNode {
    /// Writes the file at `local_path` under `name`.
    ///
    /// 1. **Prepare**: every replica reports the timestamp of its copy.
    /// 2. **Conflict guard**: a write newer than the conflict window is
    ///    referred to the conflict policy.
    /// 3. **Commit**: replicas pull the bytes from this node and acknowledge.
    /// 4. **Publish**: a brand-new name is announced to every non-replica.
    ///
    /// Both phases need `write_quorum` acks, one fewer when this node is a
    /// replica itself; a replica coordinator also counts its own copy when
    /// looking for a recent write.
    pub async fn put(
        &self,
        local_path: impl AsRef<Path>,
        name: &str,
    ) -> Result<PutOutcome, NodeError> {
        let _client = self.client_lock.lock().await;

        let source = local_path.as_ref().to_path_buf();
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(NodeError::SourceMissing(source));
        }

        let timestamp = now_ms();
        let (replicas, inserted) = match self.catalog.record(name) {
            Some(record) => (record.replicas, false),
            None => (self.placement.initial_replicas(name)?, true),
        };

        let local_id = self.local_id();
        let is_replica = replicas.contains(&local_id);
        let required = remote_quorum(self.config.write_quorum, is_replica);
        tracing::info!(
            "PUT {} -> replicas {:?} (new={}, quorum={})",
            name,
            replicas,
            inserted,
            required
        );

        let mut staged = StagedSource::stage(&self.catalog, name, source.clone());

        // Phase 1: prepare
        let mut observed = {
            let mut wait = self.pending.begin(OpKind::PutPrepare, name, required)?;
            let prepare = self.message(name, Payload::PutPrepare);
            self.send_to_remote_replicas(&replicas, &prepare).await;
            wait.wait(self.config.quorum_timeout).await?.max_timestamp
        };
        if is_replica {
            observed = observed.max(self.catalog.local_timestamp(name).unwrap_or(0));
        }

        let window = self.config.conflict_window.as_millis() as i64;
        if timestamp - observed <= window {
            let decision = self.conflict_policy.decide(name, observed, timestamp);
            tracing::info!(
                "PUT {}: last write {} ms ago, policy says {:?}",
                name,
                timestamp - observed,
                decision
            );
            if decision == ConflictDecision::Abort {
                return Ok(PutOutcome::Aborted);
            }
        }

        // Phase 2: commit
        {
            let mut wait = self.pending.begin(OpKind::PutCommit, name, required)?;
            let commit = self.message(
                name,
                Payload::PutCommit {
                    replicas: replicas.clone(),
                    timestamp,
                },
            );
            self.send_to_remote_replicas(&replicas, &commit).await;
            wait.wait(self.config.quorum_timeout).await?;
        }

        if is_replica {
            let dest = self.catalog.storage_path_for(name);
            install_copy(&source, &dest).await?;
            self.catalog
                .commit_replica(name, dest, replicas.clone(), timestamp);
            // Remote replicas pull from the local copy from now on.
            staged.release();
        } else {
            self.catalog.commit_metadata(name, replicas.clone(), timestamp);
            staged.keep();
            self.release_source_later(name, source);
        }

        if inserted {
            let insert = self.message(
                name,
                Payload::DirInsert {
                    replicas: replicas.clone(),
                },
            );
            self.broadcast_except(&replicas, &insert).await;
        }

        tracing::info!("PUT {} committed at ts={}", name, timestamp);
        Ok(PutOutcome::Committed {
            replicas,
            timestamp,
            inserted,
        })
    }

    /// Withdraws a committed put source once replicas that missed the quorum
    /// have had time to pull it.
    fn release_source_later(&self, name: &str, source: PathBuf) {
        let catalog = self.catalog.clone();
        let grace = self.config.staged_source_grace;
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if catalog.unstage(&name, &source) {
                tracing::debug!("Released put source of {}", name);
            }
        });
    }
}

/// The caller's file offered to replicas for the length of one put.
///
/// Dropped without `keep` or `release` (abort, quorum timeout, failed install)
/// it puts back whatever was staged for the name before.
struct StagedSource<'a> {
    catalog: &'a Catalog,
    name: &'a str,
    source: PathBuf,
    previous: Option<PathBuf>,
    settled: bool,
}

impl<'a> StagedSource<'a> {
    fn stage(catalog: &'a Catalog, name: &'a str, source: PathBuf) -> Self {
        let previous = catalog.stage(name, source.clone());
        Self {
            catalog,
            name,
            source,
            previous,
            settled: false,
        }
    }

    /// Leaves the source staged for stragglers.
    fn keep(&mut self) {
        self.settled = true;
    }

    fn release(&mut self) {
        self.settled = true;
        self.catalog.unstage(self.name, &self.source);
    }
}

impl Drop for StagedSource<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match self.previous.take() {
            Some(previous) => {
                self.catalog.stage(self.name, previous);
            }
            None => {
                self.catalog.unstage(self.name, &self.source);
            }
        }
    }
}

/// Copies `source` into the storage directory through a temporary file so
/// concurrent transfers never read a torn copy.
async fn install_copy(source: &Path, dest: &Path) -> std::io::Result<()> {
    if source == dest {
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path(dest);
    let copied = match tokio::fs::copy(source, &partial).await {
        Ok(_) => tokio::fs::rename(&partial, dest).await,
        Err(e) => Err(e),
    };
    if copied.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    copied
}
