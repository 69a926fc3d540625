//! Storage Node Module
//!
//! One slot of the replicated file store. Every node is simultaneously a
//! client-facing coordinator and a replica for other coordinators.
//!
//! ## Roles
//! - **Dispatcher** (`dispatcher`): the single control-socket receive loop. Answers
//!   prepares and queries, applies Directory broadcasts, stores replicas on commit and
//!   feeds acks into the pending-operation slots.
//! - **Coordinators** (`put`, `get`, `delete`): two-phase quorum write with a conflict
//!   guard, freshest-of-quorum read, quorum delete.
//! - **Re-replication monitor** (`rereplication`): the leader of each replica set (its
//!   greatest active id) replaces inactive members and announces the new set.
//!
//! ## Consistency
//! Writes need W acks and reads R acks out of a replica set of 4, so every read quorum
//! overlaps the last write quorum. Directory broadcasts are best-effort: a node that
//! misses one keeps a stale record until the next update reaches it.

pub mod config;
pub mod delete;
pub mod dispatcher;
pub mod get;
pub mod put;
pub mod rereplication;
pub mod service;
pub mod types;

pub use config::NodeConfig;
pub use service::{NodeSockets, StorageNode};
pub use types::{
    ConflictDecision, ConflictPolicy, DeleteOutcome, GetOutcome, NodeError, PutOutcome,
    RepairOutcome, RequireConfirmation,
};
