//! Placement Module
//!
//! Maps file names onto the ring of cluster slots `1..=N` and walks the ring
//! to choose which slots hold a file's bytes.
//!
//! ## Core Concepts
//! - **Hashing**: a stable polynomial string hash, reduced modulo N and shifted to `1..=N`.
//! - **Initial placement**: the first R `Active` slots clockwise from the hash.
//! - **Replacement**: the first `Active` slot clockwise from the largest current member
//!   that is not already in the set. Used only to repair after failures.

pub mod oracle;

pub use oracle::{PlacementError, PlacementOracle};
