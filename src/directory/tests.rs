//! Directory Module Tests
//!
//! Validates the Directory / LocalStore bookkeeping that every protocol
//! handler builds on.
//!
//! ## Test Scopes
//! - **Commits**: replica vs metadata-only commits, timestamp monotonicity.
//! - **Broadcasts**: `DIR_INSERT` / `DIR_UPDATE` application, release of foreign copies.
//! - **Purge**: delete removes record, local copy and staged source.
//! - **Transfer resolution**: staged put source wins over the local replica.

#[cfg(test)]
mod tests {
    use crate::directory::Catalog;
    use crate::membership::types::NodeId;
    use std::collections::BTreeSet;
    use std::path::{Path, PathBuf};

    fn set(ids: &[u16]) -> BTreeSet<NodeId> {
        ids.iter().map(|id| NodeId(*id)).collect()
    }

    fn catalog() -> Catalog {
        Catalog::new("/var/lib/fs-node")
    }

    // ============================================================
    // STORAGE PATHS
    // ============================================================

    #[test]
    fn test_storage_path_flattens_slashes() {
        let catalog = catalog();

        assert_eq!(
            catalog.storage_path_for("logs/2024/app.log"),
            PathBuf::from("/var/lib/fs-node/logs-2024-app.log")
        );
        assert_eq!(
            catalog.storage_path_for("plain.txt"),
            PathBuf::from("/var/lib/fs-node/plain.txt")
        );
    }

    // ============================================================
    // COMMITS
    // ============================================================

    #[test]
    fn test_commit_replica_registers_local_copy() {
        let catalog = catalog();
        let path = catalog.storage_path_for("a.txt");

        catalog.commit_replica("a.txt", path.clone(), set(&[6, 7, 8, 9]), 1_000);

        let record = catalog.record("a.txt").expect("record should exist");
        assert_eq!(record.replicas, set(&[6, 7, 8, 9]));
        assert_eq!(record.timestamp, 1_000);
        assert!(catalog.is_local("a.txt"));
        assert_eq!(catalog.local_path("a.txt"), Some(path));
        assert_eq!(catalog.local_timestamp("a.txt"), Some(1_000));
    }

    #[test]
    fn test_commit_metadata_is_not_local() {
        let catalog = catalog();

        catalog.commit_metadata("a.txt", set(&[6, 7, 8, 9]), 2_000);

        assert!(catalog.contains("a.txt"));
        assert!(!catalog.is_local("a.txt"));
        assert_eq!(catalog.local_timestamp("a.txt"), None);
        assert!(catalog.list_local().is_empty());
    }

    #[test]
    fn test_timestamp_never_moves_backwards() {
        let catalog = catalog();
        let path = catalog.storage_path_for("a.txt");

        catalog.commit_replica("a.txt", path.clone(), set(&[1, 2, 3, 4]), 5_000);
        catalog.commit_replica("a.txt", path, set(&[1, 2, 3, 5]), 4_000);

        let record = catalog.record("a.txt").unwrap();
        assert_eq!(record.timestamp, 5_000);
        assert_eq!(record.replicas, set(&[1, 2, 3, 5]));
    }

    // ============================================================
    // BROADCASTS
    // ============================================================

    #[test]
    fn test_learn_insert_creates_unknown_timestamp() {
        let catalog = catalog();

        catalog.learn_insert("b.bin", set(&[2, 3, 4, 5]));

        let record = catalog.record("b.bin").unwrap();
        assert_eq!(record.timestamp, 0);
        assert!(!catalog.is_local("b.bin"));
    }

    #[test]
    fn test_learn_insert_keeps_known_timestamp() {
        let catalog = catalog();

        catalog.commit_metadata("b.bin", set(&[2, 3, 4, 5]), 9_000);
        catalog.learn_insert("b.bin", set(&[2, 3, 4, 6]));

        let record = catalog.record("b.bin").unwrap();
        assert_eq!(record.timestamp, 9_000);
        assert_eq!(record.replicas, set(&[2, 3, 4, 6]));
    }

    #[test]
    fn test_learn_update_keeps_member_copy() {
        let catalog = catalog();
        catalog.commit_replica("c", catalog.storage_path_for("c"), set(&[6, 7, 8, 9]), 10);

        let released = catalog.learn_update("c", set(&[2, 6, 8, 9]), NodeId(6));

        assert!(released.is_none());
        assert!(catalog.is_local("c"));
        assert_eq!(catalog.record("c").unwrap().replicas, set(&[2, 6, 8, 9]));
    }

    #[test]
    fn test_learn_update_releases_foreign_copy() {
        let catalog = catalog();
        let path = catalog.storage_path_for("c");
        catalog.commit_replica("c", path.clone(), set(&[6, 7, 8, 9]), 10);

        let released = catalog.learn_update("c", set(&[2, 6, 8, 9]), NodeId(7));

        assert_eq!(released, Some(path));
        assert!(!catalog.is_local("c"));
        assert!(catalog.contains("c"));
    }

    #[test]
    fn test_set_replicas_requires_record() {
        let catalog = catalog();

        assert!(!catalog.set_replicas("ghost", set(&[1, 2, 3, 4])));

        catalog.commit_metadata("real", set(&[1, 2, 3, 4]), 1);
        assert!(catalog.set_replicas("real", set(&[1, 2, 3, 5])));
        assert_eq!(catalog.record("real").unwrap().replicas, set(&[1, 2, 3, 5]));
    }

    // ============================================================
    // PURGE & TRANSFER RESOLUTION
    // ============================================================

    #[test]
    fn test_purge_removes_everything() {
        let catalog = catalog();
        let path = catalog.storage_path_for("d");
        catalog.stage("d", PathBuf::from("/home/user/d"));
        catalog.commit_replica("d", path.clone(), set(&[1, 2, 3, 4]), 1);

        assert_eq!(catalog.purge("d"), Some(path));
        assert!(!catalog.contains("d"));
        assert!(!catalog.is_local("d"));
        assert!(catalog.resolve_source("d").is_none());
    }

    #[test]
    fn test_purge_unknown_is_noop() {
        let catalog = catalog();
        assert_eq!(catalog.purge("nothing"), None);
        assert_eq!(catalog.directory_len(), 0);
    }

    #[test]
    fn test_resolve_source_prefers_staged_source() {
        let catalog = catalog();
        let local = catalog.storage_path_for("e.csv");
        catalog.commit_replica("e.csv", local.clone(), set(&[1, 2, 3, 4]), 1);

        assert_eq!(catalog.resolve_source("e.csv"), Some(local.clone()));

        let staged = PathBuf::from("/home/user/e.csv");
        catalog.stage("e.csv", staged.clone());
        assert_eq!(catalog.resolve_source("e.csv"), Some(staged.clone()));

        assert!(!catalog.unstage("e.csv", Path::new("/home/user/other.csv")));
        assert_eq!(catalog.resolve_source("e.csv"), Some(staged.clone()));

        assert!(catalog.unstage("e.csv", &staged));
        assert_eq!(catalog.resolve_source("e.csv"), Some(local));
    }

    #[test]
    fn test_local_records_and_listing_sorted() {
        let catalog = catalog();
        for name in ["zeta", "alpha", "mid"] {
            catalog.commit_replica(name, catalog.storage_path_for(name), set(&[1, 2, 3, 4]), 1);
        }
        catalog.learn_insert("remote-only", set(&[5, 6, 7, 8]));

        assert_eq!(catalog.list_local(), vec!["alpha", "mid", "zeta"]);

        let names: Vec<String> = catalog.local_records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_clear_returns_local_paths() {
        let catalog = catalog();
        catalog.commit_replica("x", catalog.storage_path_for("x"), set(&[1, 2, 3, 4]), 1);
        catalog.learn_insert("y", set(&[1, 2, 3, 4]));

        let removed = catalog.clear();

        assert_eq!(removed, vec![catalog.storage_path_for("x")]);
        assert_eq!(catalog.directory_len(), 0);
    }
}
