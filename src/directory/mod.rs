//! Directory Module
//!
//! The node-local data model of the file store.
//!
//! - **Directory**: `name -> FileRecord`, eventually propagated to every node.
//! - **LocalStore**: `name -> path` of the bytes this node physically holds.
//!
//! Both live in one `Catalog` behind a single lock, so a commit arriving from
//! the dispatcher and a repair from the re-replication monitor cannot
//! interleave half-way through an update.

pub mod catalog;
pub mod types;

pub use catalog::Catalog;
pub use types::{FileRecord, now_ms};

#[cfg(test)]
mod tests;
