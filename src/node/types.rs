use crate::membership::types::NodeId;
use crate::placement::PlacementError;
use crate::protocol::{OpKind, PendingError};

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Committed {
        replicas: BTreeSet<NodeId>,
        timestamp: i64,
        /// `true` when the name was new to this node's Directory.
        inserted: bool,
    },
    /// The conflict policy declined to overwrite a recent write.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOutcome {
    /// This node holds a replica; nothing was transferred.
    Local(PathBuf),
    Fetched {
        from: NodeId,
        timestamp: i64,
        path: PathBuf,
    },
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("source file {0} does not exist")]
    SourceMissing(PathBuf),

    #[error("a {0} operation is already in flight")]
    OperationInFlight(OpKind),

    #[error("{0} quorum not reached within {1:?}")]
    QuorumTimeout(OpKind, Duration),

    #[error("{0} operation was abandoned")]
    Abandoned(OpKind),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error("no slot owns control address {0}")]
    UnknownPeer(SocketAddr),

    #[error("no replica reported a copy of {0}")]
    NoSource(String),

    #[error("transfer of {name} failed: {reason}")]
    Transfer { name: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<PendingError> for NodeError {
    fn from(e: PendingError) -> Self {
        match e {
            PendingError::SlotBusy(kind) => NodeError::OperationInFlight(kind),
            PendingError::Timeout(kind, limit) => NodeError::QuorumTimeout(kind, limit),
            PendingError::Abandoned(kind) => NodeError::Abandoned(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    Proceed,
    Abort,
}

/// Consulted when a put observes a write to the same name inside the
/// conflict window.
pub trait ConflictPolicy: Send + Sync {
    /// `observed` is the freshest timestamp reported by the replicas, `now`
    /// the timestamp the new put would carry (both ms since the epoch).
    fn decide(&self, name: &str, observed: i64, now: i64) -> ConflictDecision;
}

impl<F> ConflictPolicy for F
where
    F: Fn(&str, i64, i64) -> ConflictDecision + Send + Sync,
{
    fn decide(&self, name: &str, observed: i64, now: i64) -> ConflictDecision {
        self(name, observed, now)
    }
}

type Confirmer = Box<dyn Fn(&str, i64, i64) -> bool + Send + Sync>;

/// Proceeds only when a confirmer agrees. Without one, every conflict aborts.
#[derive(Default)]
pub struct RequireConfirmation {
    confirmer: Option<Confirmer>,
}

impl RequireConfirmation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confirmer<F>(confirmer: F) -> Self
    where
        F: Fn(&str, i64, i64) -> bool + Send + Sync + 'static,
    {
        Self {
            confirmer: Some(Box::new(confirmer)),
        }
    }
}

impl ConflictPolicy for RequireConfirmation {
    fn decide(&self, name: &str, observed: i64, now: i64) -> ConflictDecision {
        match &self.confirmer {
            Some(confirm) if confirm(name, observed, now) => ConflictDecision::Proceed,
            _ => ConflictDecision::Abort,
        }
    }
}

/// Result of one re-replication check of a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Every replica is active.
    Healthy,
    /// Another active replica is responsible for this file.
    NotLeader,
    Repaired {
        replicas: BTreeSet<NodeId>,
        added: Vec<NodeId>,
    },
    /// Not enough candidates, a push target went away or leadership moved.
    /// The next tick tries again.
    Skipped,
}
