//! Membership & Discovery Module
//!
//! Supplies the storage core with a roster of the fixed cluster slots: who is
//! `Active`, and where to reach them.
//!
//! ## Core Mechanisms
//! - **Roster contract**: the `Membership` trait is the only view the storage core has of
//!   the cluster (`local_id`, `status`, `endpoints`, `all_ids`).
//! - **Static roster**: `StaticRoster` keeps statuses set by its owner.
//! - **Gossip Protocol**: `MembershipService` exchanges ping/ack over UDP and piggybacks
//!   slot states on acks, so every node converges on the same view.
//! - **Failure Detection**: "Suspect" -> "Dead" transitions on silence; only `Dead` slots are
//!   reported `Inactive`.
//! - **Incarnation Numbers**: order state claims, refute false suspicion and announce rejoins.

pub mod roster;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
