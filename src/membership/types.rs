use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Identifier of a cluster slot, in `1..=N`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct NodeId(pub u16);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Liveness of a slot as seen by the local roster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeStatus {
    Active,
    Inactive,
}

/// Network addresses of a single slot.
///
/// `control` receives the unreliable control datagrams, `transfer` accepts
/// bulk file pulls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoints {
    pub control: SocketAddr,
    pub transfer: SocketAddr,
}

/// Read-only view of the cluster roster consumed by the storage core.
///
/// Implementations are expected to be eventually accurate, not consistent:
/// two nodes may briefly disagree about a slot's status.
pub trait Membership: Send + Sync {
    /// The slot this process occupies.
    fn local_id(&self) -> NodeId;

    fn status(&self, id: NodeId) -> NodeStatus;

    fn endpoints(&self, id: NodeId) -> Option<Endpoints>;

    /// Every slot in the cluster, in ascending order.
    fn all_ids(&self) -> Vec<NodeId>;

    fn is_active(&self, id: NodeId) -> bool {
        self.status(id) == NodeStatus::Active
    }

    /// Resolves the slot that owns a control address.
    fn id_for_control(&self, addr: SocketAddr) -> Option<NodeId> {
        self.all_ids()
            .into_iter()
            .find(|id| self.endpoints(*id).is_some_and(|ep| ep.control == addr))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// A single slot as tracked by the gossip service.
///
/// The `incarnation` field is a logical clock used to order updates and resolve
/// conflicts (e.g. refuting a false "Suspect" claim or announcing a rejoin).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub endpoints: Endpoints,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// The wire protocol of the gossip service.
///
/// - `Ping/Ack`: liveness checks and state synchronization.
/// - `Join/Leave`: a slot entering or voluntarily leaving the group.
/// - `Suspect/Alive`: disseminates changes in slot health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: NodeId,
        incarnation: u64,
    },

    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<MemberDigest>,
    },

    Join {
        from: NodeId,
        incarnation: u64,
    },

    Leave {
        node_id: NodeId,
        incarnation: u64,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node_id: NodeId,
        incarnation: u64,
    },
}

/// Compact per-slot state carried inside `Ack`. Addresses are static
/// configuration and never travel on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberDigest {
    pub id: NodeId,
    pub state: NodeState,
    pub incarnation: u64,
}
