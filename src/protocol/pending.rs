//! Pending Operation Aggregators
//!
//! Each coordinator phase opens one slot for its kind, sends its requests and
//! awaits the slot's completion signal. The dispatcher feeds acks into the slot
//! as they arrive; when the required number of distinct responders is reached
//! the slot fires its `oneshot` exactly once.
//!
//! At most one slot per kind exists at a time. Opening a busy slot is refused,
//! which makes the single-outstanding-operation rule explicit instead of
//! silently corrupting a shared counter.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    PutPrepare,
    PutCommit,
    Get,
    Delete,
    ReReplicate,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OpKind::PutPrepare => "put-prepare",
            OpKind::PutCommit => "put-commit",
            OpKind::Get => "get",
            OpKind::Delete => "delete",
            OpKind::ReReplicate => "re-replicate",
        };
        f.write_str(label)
    }
}

/// What a slot had aggregated when it reached its quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumOutcome {
    pub acks: usize,
    /// Greatest timestamp reported, `0` when none was.
    pub max_timestamp: i64,
    /// Sender of `max_timestamp`. On ties the later response wins.
    pub best_sender: Option<SocketAddr>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PendingError {
    #[error("a {0} operation is already in flight")]
    SlotBusy(OpKind),
    #[error("{0} quorum not reached within {1:?}")]
    Timeout(OpKind, Duration),
    #[error("{0} operation was abandoned")]
    Abandoned(OpKind),
}

struct Aggregator {
    generation: u64,
    name: String,
    required: usize,
    responders: HashSet<SocketAddr>,
    max_timestamp: i64,
    best_sender: Option<SocketAddr>,
    done: Option<oneshot::Sender<QuorumOutcome>>,
}

impl Aggregator {
    fn outcome(&self) -> QuorumOutcome {
        QuorumOutcome {
            acks: self.responders.len(),
            max_timestamp: self.max_timestamp,
            best_sender: self.best_sender,
        }
    }

    fn complete_if_ready(&mut self) {
        if self.responders.len() >= self.required
            && let Some(done) = self.done.take()
        {
            let _ = done.send(self.outcome());
        }
    }
}

#[derive(Default)]
pub struct PendingOps {
    slots: Mutex<HashMap<OpKind, Aggregator>>,
    generation: Mutex<u64>,
}

impl PendingOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opens the slot for `kind`. The returned handle closes it when dropped.
    pub fn begin(
        self: &Arc<Self>,
        kind: OpKind,
        name: &str,
        required: usize,
    ) -> Result<QuorumWait, PendingError> {
        let generation = {
            let mut counter = self.generation.lock();
            *counter += 1;
            *counter
        };

        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock();
        if slots.contains_key(&kind) {
            return Err(PendingError::SlotBusy(kind));
        }

        let mut aggregator = Aggregator {
            generation,
            name: name.to_string(),
            required,
            responders: HashSet::new(),
            max_timestamp: 0,
            best_sender: None,
            done: Some(tx),
        };
        aggregator.complete_if_ready();
        slots.insert(kind, aggregator);

        Ok(QuorumWait {
            ops: self.clone(),
            kind,
            generation,
            rx,
        })
    }

    /// Feeds one ack into the slot for `kind`.
    ///
    /// Returns `false` when the ack was ignored: no open slot, a different file
    /// name, or a repeat from a sender that was already counted.
    pub fn record(
        &self,
        kind: OpKind,
        name: &str,
        from: SocketAddr,
        timestamp: Option<i64>,
    ) -> bool {
        let mut slots = self.slots.lock();
        let Some(aggregator) = slots.get_mut(&kind) else {
            tracing::debug!("Ignoring {} ack from {}: no open operation", kind, from);
            return false;
        };

        if aggregator.name != name {
            tracing::debug!(
                "Ignoring {} ack for {} from {}: waiting on {}",
                kind,
                name,
                from,
                aggregator.name
            );
            return false;
        }

        if !aggregator.responders.insert(from) {
            return false;
        }

        if let Some(ts) = timestamp
            && ts >= aggregator.max_timestamp
        {
            aggregator.max_timestamp = ts;
            aggregator.best_sender = Some(from);
        }

        aggregator.complete_if_ready();
        true
    }

    pub fn is_open(&self, kind: OpKind) -> bool {
        self.slots.lock().contains_key(&kind)
    }

    fn close(&self, kind: OpKind, generation: u64) {
        let mut slots = self.slots.lock();
        if slots.get(&kind).is_some_and(|a| a.generation == generation) {
            slots.remove(&kind);
        }
    }
}

/// Handle on an open slot.
pub struct QuorumWait {
    ops: Arc<PendingOps>,
    kind: OpKind,
    generation: u64,
    rx: oneshot::Receiver<QuorumOutcome>,
}

impl QuorumWait {
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Waits for the quorum. `None` waits forever.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<QuorumOutcome, PendingError> {
        let kind = self.kind;
        let received = match timeout {
            None => (&mut self.rx).await,
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => return Err(PendingError::Timeout(kind, limit)),
            },
        };
        received.map_err(|_| PendingError::Abandoned(kind))
    }
}

impl Drop for QuorumWait {
    fn drop(&mut self) {
        self.ops.close(self.kind, self.generation);
    }
}
