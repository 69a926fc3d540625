//! Distributed File Store Node Library
//!
//! This library crate defines the modules that make up one node of a fixed-size,
//! quorum-replicated file store. It serves as the foundation for the binary
//! executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`membership`**: The cluster roster. Defines the `Membership` contract consumed by the
//!   core, an in-memory `StaticRoster`, and a UDP gossip service (SWIM-like) for fixed slots.
//! - **`placement`**: The placement oracle. Hashes file names onto the slot ring and walks it
//!   to choose replica sets and replacements.
//! - **`directory`**: The metadata and on-disk presence model (Directory + LocalStore),
//!   guarded by a single lock boundary.
//! - **`transfer`**: The bulk transfer channel. Reliable TCP pulls of whole files.
//! - **`protocol`**: The control datagram codec and the per-operation ack aggregators.
//! - **`node`**: The storage node itself: dispatcher, put/get/delete coordinators and the
//!   re-replication monitor.

pub mod directory;
pub mod membership;
pub mod node;
pub mod placement;
pub mod protocol;
pub mod transfer;
