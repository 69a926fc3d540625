//! Control Message Codec
//!
//! Text datagrams of the form `<TYPE>_<sender>_<filename>[_<extra>]*`, where
//! `<sender>` is the control address (`ip:port`) replies must go to and
//! replica lists are slot ids joined by `|` (a trailing `|` is allowed).
//!
//! Type tags themselves contain `_`, and so may file names. Decoding therefore
//! picks the longest tag whose next field parses as a socket address, then
//! peels the fixed number of extras for that type off the right-hand side;
//! whatever remains in the middle is the file name.

use crate::membership::types::NodeId;

use std::collections::BTreeSet;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram is not valid UTF-8")]
    NotUtf8,
    #[error("unknown message type in {0:?}")]
    UnknownType(String),
    #[error("invalid sender address {0:?}")]
    InvalidSender(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("invalid replica list {0:?}")]
    InvalidReplicaList(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    PutPrepare,
    /// Timestamp of the responder's local copy, `0` when it has none.
    PutAck {
        timestamp: i64,
    },
    PutCommit {
        replicas: BTreeSet<NodeId>,
        timestamp: i64,
    },
    PutCommitAck,
    DirInsert {
        replicas: BTreeSet<NodeId>,
    },
    DirUpdate {
        replicas: BTreeSet<NodeId>,
    },
    DeleteRequest,
    DeleteAck,
    DirDelete,
    GetQuery,
    GetAck {
        timestamp: i64,
    },
    PutCommitRe {
        replicas: BTreeSet<NodeId>,
        timestamp: i64,
    },
    AckRerep,
}

/// Tags ordered longest first so that `PUT_COMMIT_ACK` wins over `PUT_COMMIT`.
const TAGS: [(&str, usize); 13] = [
    ("DELETE_REQUEST", 0),
    ("PUT_COMMIT_ACK", 0),
    ("PUT_COMMIT_RE", 2),
    ("PUT_PREPARE", 0),
    ("DELETE_ACK", 0),
    ("DIR_INSERT", 1),
    ("DIR_UPDATE", 1),
    ("DIR_DELETE", 0),
    ("PUT_COMMIT", 2),
    ("GET_QUERY", 0),
    ("ACK_REREP", 0),
    ("PUT_ACK", 1),
    ("GET_ACK", 1),
];

impl Payload {
    pub fn tag(&self) -> &'static str {
        match self {
            Payload::PutPrepare => "PUT_PREPARE",
            Payload::PutAck { .. } => "PUT_ACK",
            Payload::PutCommit { .. } => "PUT_COMMIT",
            Payload::PutCommitAck => "PUT_COMMIT_ACK",
            Payload::DirInsert { .. } => "DIR_INSERT",
            Payload::DirUpdate { .. } => "DIR_UPDATE",
            Payload::DeleteRequest => "DELETE_REQUEST",
            Payload::DeleteAck => "DELETE_ACK",
            Payload::DirDelete => "DIR_DELETE",
            Payload::GetQuery => "GET_QUERY",
            Payload::GetAck { .. } => "GET_ACK",
            Payload::PutCommitRe { .. } => "PUT_COMMIT_RE",
            Payload::AckRerep => "ACK_REREP",
        }
    }

    fn extras(&self) -> Vec<String> {
        match self {
            Payload::PutAck { timestamp } | Payload::GetAck { timestamp } => {
                vec![timestamp.to_string()]
            }
            Payload::PutCommit {
                replicas,
                timestamp,
            }
            | Payload::PutCommitRe {
                replicas,
                timestamp,
            } => vec![encode_replicas(replicas), timestamp.to_string()],
            Payload::DirInsert { replicas } | Payload::DirUpdate { replicas } => {
                vec![encode_replicas(replicas)]
            }
            _ => Vec::new(),
        }
    }

    fn from_parts(tag: &str, extras: &[&str]) -> Result<Self, WireError> {
        let payload = match tag {
            "PUT_PREPARE" => Payload::PutPrepare,
            "PUT_ACK" => Payload::PutAck {
                timestamp: parse_timestamp(extras[0])?,
            },
            "PUT_COMMIT" => Payload::PutCommit {
                replicas: decode_replicas(extras[0])?,
                timestamp: parse_timestamp(extras[1])?,
            },
            "PUT_COMMIT_ACK" => Payload::PutCommitAck,
            "DIR_INSERT" => Payload::DirInsert {
                replicas: decode_replicas(extras[0])?,
            },
            "DIR_UPDATE" => Payload::DirUpdate {
                replicas: decode_replicas(extras[0])?,
            },
            "DELETE_REQUEST" => Payload::DeleteRequest,
            "DELETE_ACK" => Payload::DeleteAck,
            "DIR_DELETE" => Payload::DirDelete,
            "GET_QUERY" => Payload::GetQuery,
            "GET_ACK" => Payload::GetAck {
                timestamp: parse_timestamp(extras[0])?,
            },
            "PUT_COMMIT_RE" => Payload::PutCommitRe {
                replicas: decode_replicas(extras[0])?,
                timestamp: parse_timestamp(extras[1])?,
            },
            "ACK_REREP" => Payload::AckRerep,
            other => return Err(WireError::UnknownType(other.to_string())),
        };
        Ok(payload)
    }
}

/// One control datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    /// Control address of the sender; replies are addressed here.
    pub sender: SocketAddr,
    pub name: String,
    pub payload: Payload,
}

impl ControlMessage {
    pub fn new(sender: SocketAddr, name: impl Into<String>, payload: Payload) -> Self {
        Self {
            sender,
            name: name.into(),
            payload,
        }
    }

    pub fn encode(&self) -> String {
        let mut out = format!("{}_{}_{}", self.payload.tag(), self.sender, self.name);
        for extra in self.payload.extras() {
            out.push('_');
            out.push_str(&extra);
        }
        out
    }

    pub fn from_datagram(buf: &[u8]) -> Result<Self, WireError> {
        let raw = std::str::from_utf8(buf).map_err(|_| WireError::NotUtf8)?;
        Self::decode(raw)
    }

    pub fn decode(raw: &str) -> Result<Self, WireError> {
        let mut bad_sender: Option<&str> = None;

        for (tag, extra_count) in TAGS {
            let Some(rest) = raw.strip_prefix(tag).and_then(|r| r.strip_prefix('_')) else {
                continue;
            };
            let (sender_field, body) = rest.split_once('_').unwrap_or((rest, ""));
            let Ok(sender) = sender_field.parse::<SocketAddr>() else {
                bad_sender.get_or_insert(sender_field);
                continue;
            };

            let mut parts: Vec<&str> = body.rsplitn(extra_count + 1, '_').collect();
            if parts.len() < extra_count + 1 {
                return Err(WireError::MissingField("extra"));
            }
            let name = parts.pop().unwrap_or_default();
            if name.is_empty() {
                return Err(WireError::MissingField("filename"));
            }
            parts.reverse();

            return Ok(Self {
                sender,
                name: name.to_string(),
                payload: Payload::from_parts(tag, &parts)?,
            });
        }

        if let Some(sender) = bad_sender {
            return Err(WireError::InvalidSender(sender.to_string()));
        }
        Err(WireError::UnknownType(truncate(raw)))
    }
}

pub fn encode_replicas(replicas: &BTreeSet<NodeId>) -> String {
    replicas.iter().map(|id| format!("{}|", id)).collect()
}

pub fn decode_replicas(field: &str) -> Result<BTreeSet<NodeId>, WireError> {
    let mut replicas = BTreeSet::new();
    for part in field.split('|').filter(|p| !p.is_empty()) {
        let id: u16 = part
            .parse()
            .map_err(|_| WireError::InvalidReplicaList(field.to_string()))?;
        replicas.insert(NodeId(id));
    }
    if replicas.is_empty() {
        return Err(WireError::InvalidReplicaList(field.to_string()));
    }
    Ok(replicas)
}

fn parse_timestamp(field: &str) -> Result<i64, WireError> {
    field
        .parse()
        .map_err(|_| WireError::InvalidTimestamp(field.to_string()))
}

fn truncate(raw: &str) -> String {
    raw.chars().take(32).collect()
}
