use anyhow::Result;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Instant;
use std::{net::SocketAddr, time::Duration};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::info;

use super::types::{
    Endpoints, GossipMessage, Member, MemberDigest, Membership, NodeId, NodeState, NodeStatus,
};

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const GOSSIP_FANOUT: usize = 3;
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(1);
const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Static description of one cluster slot.
#[derive(Debug, Clone, Copy)]
pub struct SlotConfig {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub endpoints: Endpoints,
}

/// Gossip failure detector over a fixed slot table.
///
/// Every slot starts `Dead` (unknown) except that the local slot turns `Alive`
/// once it bootstraps a group or joins one through an introducer.
pub struct MembershipService {
    pub local_id: NodeId,
    pub members: Arc<DashMap<NodeId, Member>>,
    socket: Arc<UdpSocket>,
    incarnation: Arc<RwLock<u64>>,
}

impl MembershipService {
    pub async fn new(local_id: NodeId, slots: Vec<SlotConfig>) -> Result<Arc<Self>> {
        let local = slots
            .iter()
            .find(|slot| slot.id == local_id)
            .ok_or_else(|| anyhow::anyhow!("Slot {} is not part of the cluster", local_id))?;

        let socket = UdpSocket::bind(local.gossip_addr).await?;

        let members = Arc::new(DashMap::new());
        for slot in slots.iter() {
            members.insert(
                slot.id,
                Member {
                    id: slot.id,
                    gossip_addr: slot.gossip_addr,
                    endpoints: slot.endpoints,
                    state: NodeState::Dead,
                    incarnation: 0,
                    last_seen: None,
                },
            );
        }

        Ok(Arc::new(Self {
            local_id,
            members,
            socket: Arc::new(socket),
            incarnation: Arc::new(RwLock::new(0)),
        }))
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting membership service...");

        let _gossip_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.gossip_loop().await;
            })
        };

        let _receive_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop().await;
            })
        };

        let _failure_detection_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.failure_detection_loop().await;
            })
        };

        tracing::info!("All background tasks started");
    }

    /// Starts a new group with this slot as its only live member.
    pub async fn bootstrap(&self) {
        let incarnation = self.bump_incarnation().await;
        self.set_local_state(NodeState::Alive, incarnation);
        info!("Slot {} bootstrapped a new group", self.local_id);
    }

    /// Joins the group through the given introducer slot.
    pub async fn join(&self, introducer: NodeId) -> Result<()> {
        let target = self
            .members
            .get(&introducer)
            .map(|member| member.gossip_addr)
            .ok_or_else(|| anyhow::anyhow!("Unknown introducer slot {}", introducer))?;

        let incarnation = self.bump_incarnation().await;
        self.set_local_state(NodeState::Alive, incarnation);

        let msg = GossipMessage::Join {
            from: self.local_id,
            incarnation,
        };
        let encoded = bincode::serialize(&msg)?;
        self.socket.send_to(&encoded, target).await?;
        info!("Sent join request to slot {} at {}", introducer, target);

        Ok(())
    }

    /// Voluntarily leaves the group. Peers mark this slot `Dead` right away.
    pub async fn leave(&self) {
        let incarnation = self.bump_incarnation().await;
        self.broadcast_message(GossipMessage::Leave {
            node_id: self.local_id,
            incarnation,
        })
        .await;
        self.set_local_state(NodeState::Dead, incarnation);
        info!("Slot {} left the group", self.local_id);
    }

    pub fn is_local_alive(&self) -> bool {
        self.members
            .get(&self.local_id)
            .map(|member| member.state == NodeState::Alive)
            .unwrap_or(false)
    }

    pub fn get_alive_members(&self) -> Vec<Member> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Snapshot of every slot, ordered by id.
    pub fn list_members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        members.sort_by_key(|member| member.id);
        members
    }

    fn set_local_state(&self, state: NodeState, incarnation: u64) {
        if let Some(mut local) = self.members.get_mut(&self.local_id) {
            local.state = state;
            local.incarnation = incarnation;
            local.last_seen = Some(Instant::now());
        }
    }

    async fn bump_incarnation(&self) -> u64 {
        let mut inc = self.incarnation.write().await;
        *inc += 1;
        *inc
    }

    fn digests(&self) -> Vec<MemberDigest> {
        self.members
            .iter()
            .map(|entry| MemberDigest {
                id: entry.id,
                state: entry.state,
                incarnation: entry.incarnation,
            })
            .collect()
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

        loop {
            interval.tick().await;

            if !self.is_local_alive() {
                continue;
            }

            let alive_members: Vec<Member> = self
                .members
                .iter()
                .filter(|entry| {
                    entry.value().id != self.local_id && entry.value().state != NodeState::Dead
                })
                .map(|entry| entry.value().clone())
                .collect();

            if alive_members.is_empty() {
                continue;
            }

            let targets: Vec<Member> = alive_members
                .choose_multiple(&mut rand::thread_rng(), GOSSIP_FANOUT)
                .cloned()
                .collect();

            let incarnation = *self.incarnation.read().await;
            let msg = GossipMessage::Ping {
                from: self.local_id,
                incarnation,
            };

            let Ok(encoded) = bincode::serialize(&msg) else {
                tracing::error!("Failed to serialize GossipMessage::Ping");
                continue;
            };

            for target in targets {
                if let Err(e) = self.socket.send_to(&encoded, target.gossip_addr).await {
                    tracing::warn!("Failed to send ping to slot {}: {}", target.id, e);
                } else {
                    tracing::trace!("Sent ping to slot {}", target.id);
                }
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if !self.is_local_alive() {
                            continue;
                        }
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling gossip from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize gossip from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping { from, incarnation } => {
                self.mark_heard_from(from, incarnation);
                self.reply_ack(src).await?;
            }

            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.mark_heard_from(from, incarnation);
                for digest in members {
                    self.merge_member(digest).await;
                }
            }

            GossipMessage::Join { from, incarnation } => {
                tracing::info!("Slot {} joining cluster (inc={})", from, incarnation);
                self.mark_heard_from(from, incarnation);
                self.reply_ack(src).await?;
            }

            GossipMessage::Leave {
                node_id,
                incarnation,
            } => {
                self.handle_leave(node_id, incarnation);
            }

            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await;
            }

            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.handle_alive(node_id, incarnation);
            }
        }

        Ok(())
    }

    async fn reply_ack(&self, dest: SocketAddr) -> Result<()> {
        let reply = GossipMessage::Ack {
            from: self.local_id,
            incarnation: *self.incarnation.read().await,
            members: self.digests(),
        };

        let encoded = bincode::serialize(&reply)?;
        self.socket.send_to(&encoded, dest).await?;

        Ok(())
    }

    /// Direct contact is proof of liveness regardless of what gossip said.
    fn mark_heard_from(&self, from: NodeId, incarnation: u64) {
        if from == self.local_id {
            return;
        }

        match self.members.get_mut(&from) {
            Some(mut member) => {
                if member.state != NodeState::Alive {
                    tracing::info!("Slot {} is Alive (inc={})", from, incarnation);
                }
                member.state = NodeState::Alive;
                member.incarnation = member.incarnation.max(incarnation);
                member.last_seen = Some(Instant::now());
            }
            None => {
                tracing::warn!("Message from slot {} outside the cluster table", from);
            }
        }
    }

    async fn merge_member(&self, digest: MemberDigest) {
        if digest.id == self.local_id {
            let mine = *self.incarnation.read().await;
            if digest.state != NodeState::Alive && digest.incarnation >= mine && self.is_local_alive()
            {
                self.refute().await;
            }
            return;
        }

        let Some(mut existing) = self.members.get_mut(&digest.id) else {
            return;
        };

        if digest.incarnation > existing.incarnation {
            tracing::debug!(
                "Updating slot {}: inc {} -> {} ({:?})",
                digest.id,
                existing.incarnation,
                digest.incarnation,
                digest.state,
            );

            existing.state = digest.state;
            existing.incarnation = digest.incarnation;
            existing.last_seen = Some(Instant::now());
        } else if digest.incarnation == existing.incarnation
            && digest.state == NodeState::Alive
            && existing.state == NodeState::Suspect
        {
            tracing::info!("Slot {} refuted suspicion", digest.id);
            existing.state = NodeState::Alive;
            existing.last_seen = Some(Instant::now());
        }
    }

    async fn refute(&self) {
        let incarnation = self.bump_incarnation().await;
        self.set_local_state(NodeState::Alive, incarnation);
        tracing::info!("Refuting suspicion about slot {} (inc={})", self.local_id, incarnation);

        self.broadcast_message(GossipMessage::Alive {
            node_id: self.local_id,
            incarnation,
        })
        .await;
    }

    fn handle_leave(&self, node_id: NodeId, incarnation: u64) {
        if let Some(mut existing) = self.members.get_mut(&node_id)
            && incarnation >= existing.incarnation
        {
            tracing::info!("Slot {} left the group", node_id);
            existing.state = NodeState::Dead;
            existing.incarnation = incarnation;
        }
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) {
        if node_id == self.local_id {
            self.refute().await;
            return;
        }

        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation >= existing.incarnation && existing.state == NodeState::Alive {
                    tracing::info!("Slot {} suspected", node_id);
                    existing.state = NodeState::Suspect;
                    existing.incarnation = incarnation;
                }
            }
            None => {
                tracing::debug!("Suspected slot {} doesn't exist", node_id);
            }
        }
    }

    fn handle_alive(&self, node_id: NodeId, incarnation: u64) {
        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation > existing.incarnation
                    || (incarnation == existing.incarnation
                        && existing.state == NodeState::Suspect)
                {
                    tracing::info!("Slot {} is now Alive (inc={})", node_id, incarnation);
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                tracing::debug!("Alive message for unknown slot {}", node_id);
            }
        }
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_DETECTION_INTERVAL);

        loop {
            interval.tick().await;
            let now = Instant::now();

            let mut messages_to_broadcast = Vec::new();

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();

                if member.id == self.local_id {
                    continue;
                }

                let Some(last_seen) = member.last_seen else {
                    continue;
                };
                let elapsed = now.duration_since(last_seen);

                match member.state {
                    NodeState::Alive => {
                        if elapsed > SUSPECT_TIMEOUT {
                            tracing::warn!(
                                "Slot {} suspected (no contact for {:?})",
                                member.id,
                                elapsed
                            );

                            member.state = NodeState::Suspect;
                            messages_to_broadcast.push(GossipMessage::Suspect {
                                node_id: member.id,
                                incarnation: member.incarnation,
                            });
                        }
                    }

                    NodeState::Suspect => {
                        if elapsed > DEAD_TIMEOUT {
                            tracing::warn!(
                                "Slot {} declared DEAD (no contact for {:?})",
                                member.id,
                                elapsed
                            );
                            member.state = NodeState::Dead;
                        }
                    }

                    NodeState::Dead => {}
                }
            }

            for msg in messages_to_broadcast {
                self.broadcast_message(msg).await;
            }
        }
    }

    async fn broadcast_message(&self, msg: GossipMessage) {
        let Ok(encoded) = bincode::serialize(&msg) else {
            tracing::error!("Failed to serialize {:?}", msg);
            return;
        };

        let targets: Vec<(NodeId, SocketAddr)> = self
            .members
            .iter()
            .filter(|entry| entry.id != self.local_id && entry.state != NodeState::Dead)
            .map(|entry| (entry.id, entry.gossip_addr))
            .collect();

        for (id, addr) in targets {
            if let Err(e) = self.socket.send_to(&encoded, addr).await {
                tracing::warn!("Failed to broadcast to slot {}: {}", id, e);
            }
        }
    }
}

/// Suspected slots still count as `Active`: only a `Dead` verdict triggers repair.
impl Membership for MembershipService {
    fn local_id(&self) -> NodeId {
        self.local_id
    }

    fn status(&self, id: NodeId) -> NodeStatus {
        match self.members.get(&id).map(|member| member.state) {
            Some(NodeState::Alive) | Some(NodeState::Suspect) => NodeStatus::Active,
            _ => NodeStatus::Inactive,
        }
    }

    fn endpoints(&self, id: NodeId) -> Option<Endpoints> {
        self.members.get(&id).map(|member| member.endpoints)
    }

    fn all_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.members.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_slot() -> Vec<SlotConfig> {
        vec![SlotConfig {
            id: NodeId(1),
            gossip_addr: "127.0.0.1:0".parse().unwrap(),
            endpoints: Endpoints {
                control: "127.0.0.1:7001".parse().unwrap(),
                transfer: "127.0.0.1:8001".parse().unwrap(),
            },
        }]
    }

    #[tokio::test]
    async fn test_membership_creation() {
        let service = MembershipService::new(NodeId(1), single_slot())
            .await
            .expect("Failed to create service");

        assert_eq!(service.members.len(), 1);
        assert!(!service.is_local_alive());
        assert_eq!(service.status(NodeId(1)), NodeStatus::Inactive);

        service.bootstrap().await;

        let members = service.get_alive_members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].state, NodeState::Alive);
        assert_eq!(service.status(NodeId(1)), NodeStatus::Active);
    }
}
