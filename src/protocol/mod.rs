//! Control Protocol Module
//!
//! Defines the unreliable datagram messages exchanged between nodes and the
//! aggregation state coordinators wait on.
//!
//! - **`message`**: the `<TYPE>_<sender>_<filename>[_<extra>]*` text codec.
//! - **`pending`**: one ack aggregator per operation kind, completed exactly once.

pub mod message;
pub mod pending;

pub use message::{ControlMessage, Payload, WireError};
pub use pending::{OpKind, PendingError, PendingOps, QuorumOutcome, QuorumWait};
