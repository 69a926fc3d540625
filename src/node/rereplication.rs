use super::service::StorageNode;
use super::types::{NodeError, RepairOutcome};
use crate::directory::FileRecord;
use crate::membership::types::NodeId;
use crate::protocol::{OpKind, Payload, PendingError};

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

impl StorageNode {
    /// Periodically restores the replication factor of every local file whose
    /// replica set lost members.
    pub(crate) async fn rereplication_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.rereplication_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if !self.is_active() {
                continue;
            }

            for record in self.catalog.local_records() {
                if let Err(e) = self.repair(&record).await {
                    tracing::warn!("Re-replication of {} failed: {}", record.name, e);
                }
            }
        }
    }

    /// The greatest active id of a replica set.
    pub fn leader_of(&self, replicas: &BTreeSet<NodeId>) -> Option<NodeId> {
        replicas
            .iter()
            .rev()
            .copied()
            .find(|id| self.membership.is_active(*id))
    }

    /// Checks one file and, if this node leads its replica set, replaces the
    /// inactive members.
    ///
    /// New members receive `PUT_COMMIT_RE` one at a time and pull the bytes
    /// from this node. The record changes only once every new member has
    /// acknowledged; the new set is then announced with `DIR_UPDATE`.
    pub async fn repair(&self, record: &FileRecord) -> Result<RepairOutcome, NodeError> {
        let local_id = self.local_id();
        if self.leader_of(&record.replicas) != Some(local_id) {
            return Ok(RepairOutcome::NotLeader);
        }

        let failed: Vec<NodeId> = record
            .replicas
            .iter()
            .copied()
            .filter(|id| !self.membership.is_active(*id))
            .collect();
        if failed.is_empty() {
            return Ok(RepairOutcome::Healthy);
        }

        // The walk for each replacement starts after the greatest member of the
        // set as it stands, failed ids included.
        let mut replicas = record.replicas.clone();
        let mut added = Vec::new();

        for lost in &failed {
            let Some(candidate) = self.replacement_for(record, &replicas) else {
                return Ok(RepairOutcome::Skipped);
            };
            replicas.remove(lost);
            replicas.insert(candidate);
            added.push(candidate);
        }

        while replicas.len() < self.placement.replication_factor() {
            let Some(candidate) = self.replacement_for(record, &replicas) else {
                return Ok(RepairOutcome::Skipped);
            };
            replicas.insert(candidate);
            added.push(candidate);
        }

        tracing::info!(
            "Repairing {}: failed {:?}, new set {:?}",
            record.name,
            failed,
            replicas
        );

        for target in &added {
            if !self.push_replica(*target, record, &replicas).await? {
                tracing::warn!("Push of {} to slot {} abandoned", record.name, target);
                return Ok(RepairOutcome::Skipped);
            }
        }

        if !self.catalog.set_replicas(&record.name, replicas.clone()) {
            tracing::info!("{} was deleted during repair", record.name);
            return Ok(RepairOutcome::Skipped);
        }

        let update = self.message(
            &record.name,
            Payload::DirUpdate {
                replicas: replicas.clone(),
            },
        );
        self.broadcast_except(&BTreeSet::new(), &update).await;

        tracing::info!("Repaired {} onto {:?}", record.name, added);
        Ok(RepairOutcome::Repaired { replicas, added })
    }

    fn replacement_for(
        &self,
        record: &FileRecord,
        current: &BTreeSet<NodeId>,
    ) -> Option<NodeId> {
        let candidate = self.placement.next_replacement(current);
        if candidate.is_none() {
            tracing::warn!(
                "Cannot repair {}: no candidate left outside {:?}",
                record.name,
                current
            );
        }
        candidate
    }

    /// Sends `PUT_COMMIT_RE` to `target` until it acknowledges.
    ///
    /// Returns `false` once the target turns inactive or this node stops
    /// leading the replica set.
    async fn push_replica(
        &self,
        target: NodeId,
        record: &FileRecord,
        replicas: &BTreeSet<NodeId>,
    ) -> Result<bool, NodeError> {
        let mut wait = self.pending.begin(OpKind::ReReplicate, &record.name, 1)?;
        let push = self.message(
            &record.name,
            Payload::PutCommitRe {
                replicas: replicas.clone(),
                timestamp: record.timestamp,
            },
        );

        loop {
            if self.leader_of(&record.replicas) != Some(self.local_id()) {
                return Ok(false);
            }
            if !self.membership.is_active(target) {
                return Ok(false);
            }
            if !self.send_to_node(target, &push).await {
                return Ok(false);
            }

            match wait.wait(Some(self.config.rerep_ack_interval)).await {
                Ok(_) => return Ok(true),
                Err(PendingError::Timeout(..)) => {
                    tracing::debug!("No ACK_REREP for {} from slot {}, resending", record.name, target);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
