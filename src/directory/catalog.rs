//! Directory + LocalStore
//!
//! The node's view of which files exist (Directory), which of them it holds
//! bytes for (LocalStore), and which caller files it is currently offering to
//! replicas during a put (staged sources).
//!
//! The dispatcher, the client coordinators and the re-replication monitor all
//! mutate this state concurrently, so every mutation below is one critical
//! section over the whole catalog. File bytes are never touched while the lock
//! is held: operations that drop a local copy hand its path back to the caller.

use super::types::FileRecord;
use crate::membership::types::NodeId;

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
struct CatalogInner {
    directory: HashMap<String, FileRecord>,
    local: HashMap<String, PathBuf>,
    staged: HashMap<String, PathBuf>,
}

#[derive(Debug)]
pub struct Catalog {
    storage_dir: PathBuf,
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            inner: RwLock::new(CatalogInner::default()),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Where this node persists its replica of `name`.
    pub fn storage_path_for(&self, name: &str) -> PathBuf {
        self.storage_dir.join(name.replace('/', "-"))
    }

    // --- Reads ---

    pub fn record(&self, name: &str) -> Option<FileRecord> {
        self.inner.read().directory.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().directory.contains_key(name)
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.inner.read().local.contains_key(name)
    }

    pub fn local_path(&self, name: &str) -> Option<PathBuf> {
        self.inner.read().local.get(name).cloned()
    }

    /// Timestamp of the local copy, if this node holds one.
    pub fn local_timestamp(&self, name: &str) -> Option<i64> {
        let inner = self.inner.read();
        if !inner.local.contains_key(name) {
            return None;
        }
        Some(inner.directory.get(name).map(|r| r.timestamp).unwrap_or(0))
    }

    /// Names of the files this node holds bytes for, sorted.
    pub fn list_local(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().local.keys().cloned().collect();
        names.sort();
        names
    }

    /// Records of every local file that also has a Directory entry.
    pub fn local_records(&self) -> Vec<FileRecord> {
        let inner = self.inner.read();
        let mut records = Vec::with_capacity(inner.local.len());
        for name in inner.local.keys() {
            match inner.directory.get(name) {
                Some(record) => records.push(record.clone()),
                None => {
                    tracing::warn!("Local file {} has no directory entry", name);
                }
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Path to serve for a bulk transfer request. A staged put source wins over
    /// the local replica: during an update the replica still holds the old bytes.
    pub fn resolve_source(&self, name: &str) -> Option<PathBuf> {
        let inner = self.inner.read();
        inner
            .staged
            .get(name)
            .or_else(|| inner.local.get(name))
            .cloned()
    }

    pub fn directory_len(&self) -> usize {
        self.inner.read().directory.len()
    }

    // --- Mutations ---

    /// Registers the caller's file as the source replicas pull from during a
    /// put. Returns the source it replaces.
    pub fn stage(&self, name: &str, source: PathBuf) -> Option<PathBuf> {
        self.inner.write().staged.insert(name.to_string(), source)
    }

    /// Withdraws the staged source of `name` if it is still `source`. A later
    /// put may have staged another file in the meantime.
    pub fn unstage(&self, name: &str, source: &Path) -> bool {
        let mut inner = self.inner.write();
        if inner.staged.get(name).map(PathBuf::as_path) == Some(source) {
            inner.staged.remove(name);
            true
        } else {
            false
        }
    }

    /// Records a committed replica held on this node.
    ///
    /// The stored timestamp never moves backwards: a late commit carrying an
    /// older timestamp only refreshes the replica set.
    pub fn commit_replica(
        &self,
        name: &str,
        path: PathBuf,
        replicas: BTreeSet<NodeId>,
        timestamp: i64,
    ) {
        let mut inner = self.inner.write();
        upsert(&mut inner.directory, name, replicas, Some(timestamp));
        inner.local.insert(name.to_string(), path);
    }

    /// Records a committed write this node coordinated without holding bytes.
    pub fn commit_metadata(&self, name: &str, replicas: BTreeSet<NodeId>, timestamp: i64) {
        let mut inner = self.inner.write();
        upsert(&mut inner.directory, name, replicas, Some(timestamp));
    }

    /// Applies a `DIR_INSERT` broadcast.
    pub fn learn_insert(&self, name: &str, replicas: BTreeSet<NodeId>) {
        let mut inner = self.inner.write();
        upsert(&mut inner.directory, name, replicas, None);
    }

    /// Applies a `DIR_UPDATE` broadcast.
    ///
    /// If the new set no longer contains `local_id`, the local copy is released
    /// and its path returned so the caller can remove the bytes.
    pub fn learn_update(
        &self,
        name: &str,
        replicas: BTreeSet<NodeId>,
        local_id: NodeId,
    ) -> Option<PathBuf> {
        let mut inner = self.inner.write();
        let excluded = !replicas.contains(&local_id);
        upsert(&mut inner.directory, name, replicas, None);

        if excluded {
            return inner.local.remove(name);
        }
        None
    }

    /// Replaces the replica set of an existing record. Returns `false` when the
    /// record disappeared in the meantime (e.g. a concurrent delete).
    pub fn set_replicas(&self, name: &str, replicas: BTreeSet<NodeId>) -> bool {
        let mut inner = self.inner.write();
        match inner.directory.get_mut(name) {
            Some(record) => {
                record.replicas = replicas;
                true
            }
            None => false,
        }
    }

    /// Removes every trace of `name`. Returns the local replica path, if any.
    pub fn purge(&self, name: &str) -> Option<PathBuf> {
        let mut inner = self.inner.write();
        inner.directory.remove(name);
        inner.staged.remove(name);
        inner.local.remove(name)
    }

    /// Forgets everything, e.g. before rejoining the group.
    pub fn clear(&self) -> Vec<PathBuf> {
        let mut inner = self.inner.write();
        inner.directory.clear();
        inner.staged.clear();
        inner.local.drain().map(|(_, path)| path).collect()
    }
}

fn upsert(
    directory: &mut HashMap<String, FileRecord>,
    name: &str,
    replicas: BTreeSet<NodeId>,
    timestamp: Option<i64>,
) {
    match directory.get_mut(name) {
        Some(record) => {
            record.replicas = replicas;
            if let Some(ts) = timestamp {
                record.timestamp = record.timestamp.max(ts);
            }
        }
        None => {
            directory.insert(
                name.to_string(),
                FileRecord::new(name, replicas, timestamp.unwrap_or(0)),
            );
        }
    }
}
