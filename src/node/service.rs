use super::config::NodeConfig;
use super::types::{ConflictPolicy, RequireConfirmation};
use crate::directory::Catalog;
use crate::membership::types::{Endpoints, Membership, NodeId};
use crate::placement::PlacementOracle;
use crate::protocol::{ControlMessage, Payload, PendingOps};
use crate::transfer::TransferServer;

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

/// The two listening sockets of a node, bound before the node is built so
/// that callers can publish the actual addresses in their roster first.
pub struct NodeSockets {
    control: UdpSocket,
    transfer: TcpListener,
}

impl NodeSockets {
    pub async fn bind(control: SocketAddr, transfer: SocketAddr) -> Result<Self> {
        let control = UdpSocket::bind(control).await?;
        let transfer = TcpListener::bind(transfer).await?;
        Ok(Self { control, transfer })
    }

    pub fn endpoints(&self) -> Result<Endpoints> {
        Ok(Endpoints {
            control: self.control.local_addr()?,
            transfer: self.transfer.local_addr()?,
        })
    }
}

/// One slot of the file store.
///
/// Owns the control socket, the catalog and the pending-operation slots.
/// Background roles (dispatcher, transfer server, re-replication monitor)
/// run as tasks spawned by [`StorageNode::start`]; client operations are
/// async methods serialized by `client_lock`.
pub struct StorageNode {
    pub(crate) config: NodeConfig,
    pub(crate) membership: Arc<dyn Membership>,
    pub(crate) placement: PlacementOracle,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) pending: Arc<PendingOps>,
    pub(crate) conflict_policy: Box<dyn ConflictPolicy>,
    pub(crate) client_lock: tokio::sync::Mutex<()>,
    socket: UdpSocket,
    control_addr: SocketAddr,
    transfer: Mutex<Option<TransferServer>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StorageNode {
    pub fn new(
        config: NodeConfig,
        membership: Arc<dyn Membership>,
        sockets: NodeSockets,
    ) -> Result<Self> {
        let local_id = membership.local_id();
        // Replies must reach the address peers know us by, not a wildcard bind.
        let control_addr = match membership.endpoints(local_id) {
            Some(endpoints) => endpoints.control,
            None => sockets.control.local_addr()?,
        };

        let catalog = Arc::new(Catalog::new(config.storage_dir.clone()));
        let transfer = TransferServer::from_listener(sockets.transfer, catalog.clone());
        let placement = PlacementOracle::new(membership.clone(), config.replication_factor);

        Ok(Self {
            config,
            membership,
            placement,
            catalog,
            pending: PendingOps::new(),
            conflict_policy: Box::new(RequireConfirmation::new()),
            client_lock: tokio::sync::Mutex::new(()),
            socket: sockets.control,
            control_addr,
            transfer: Mutex::new(Some(transfer)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn with_conflict_policy(mut self, policy: impl ConflictPolicy + 'static) -> Self {
        self.conflict_policy = Box::new(policy);
        self
    }

    /// Spawns the dispatcher, the transfer server and the re-replication monitor.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        tokio::fs::create_dir_all(self.catalog.storage_dir()).await?;

        let server = self
            .transfer
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("Node {} already started", self.local_id()))?;

        let mut handles = vec![server.spawn()];

        let dispatcher = self.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.receive_loop().await;
        }));

        let monitor = self.clone();
        handles.push(tokio::spawn(async move {
            monitor.rereplication_loop().await;
        }));

        self.tasks.lock().extend(handles);

        tracing::info!(
            "Node {} started (control={}, storage={})",
            self.local_id(),
            self.control_addr,
            self.catalog.storage_dir().display()
        );
        Ok(())
    }

    /// Stops every background task. Commit handlers already running finish on
    /// their own.
    pub fn shutdown(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        tracing::info!("Node {} stopped", self.local_id());
    }

    pub fn local_id(&self) -> NodeId {
        self.membership.local_id()
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub(crate) fn is_active(&self) -> bool {
        self.membership.is_active(self.local_id())
    }

    // --- Client queries ---

    /// Replica set of `name` as recorded in the local Directory.
    pub fn list_replicas(&self, name: &str) -> Option<BTreeSet<NodeId>> {
        self.catalog.record(name).map(|record| record.replicas)
    }

    /// Names this node holds bytes for.
    pub fn list_local(&self) -> Vec<String> {
        self.catalog.list_local()
    }

    /// Forgets all files and deletes the local replicas, e.g. before rejoining.
    pub async fn clear_local_state(&self) {
        let paths = self.catalog.clear();
        let removed = paths.len();
        remove_files(paths).await;
        tracing::info!("Node {} cleared local state ({} replicas removed)", self.local_id(), removed);
    }

    // --- Control channel ---

    pub(crate) fn message(&self, name: &str, payload: Payload) -> ControlMessage {
        ControlMessage::new(self.control_addr, name, payload)
    }

    /// Sends until the socket accepts the datagram. Delivery is not confirmed.
    pub(crate) async fn send_with_retry(&self, addr: SocketAddr, msg: &ControlMessage) {
        let datagram = msg.encode();
        let mut delay_ms = 150u64;

        loop {
            match self.socket.send_to(datagram.as_bytes(), addr).await {
                Ok(_) => {
                    tracing::debug!("Sent {} to {}", msg.payload.tag(), addr);
                    return;
                }
                Err(e) => {
                    tracing::warn!("Send of {} to {} failed: {}", msg.payload.tag(), addr, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }
    }

    /// Returns `false` when the roster has no address for `id`.
    pub(crate) async fn send_to_node(&self, id: NodeId, msg: &ControlMessage) -> bool {
        match self.membership.endpoints(id) {
            Some(endpoints) => {
                self.send_with_retry(endpoints.control, msg).await;
                true
            }
            None => {
                tracing::error!("No address for slot {}, dropping {}", id, msg.payload.tag());
                false
            }
        }
    }

    /// Sends `msg` to every replica except this node.
    pub(crate) async fn send_to_remote_replicas(
        &self,
        replicas: &BTreeSet<NodeId>,
        msg: &ControlMessage,
    ) {
        let local_id = self.local_id();
        for id in replicas.iter().copied().filter(|id| *id != local_id) {
            self.send_to_node(id, msg).await;
        }
    }

    /// Single-attempt send to every slot outside `exclude` and this node.
    pub(crate) async fn broadcast_except(&self, exclude: &BTreeSet<NodeId>, msg: &ControlMessage) {
        let local_id = self.local_id();
        let datagram = msg.encode();

        for id in self.membership.all_ids() {
            if id == local_id || exclude.contains(&id) {
                continue;
            }
            let Some(endpoints) = self.membership.endpoints(id) else {
                continue;
            };
            if let Err(e) = self.socket.send_to(datagram.as_bytes(), endpoints.control).await {
                tracing::warn!("Broadcast of {} to slot {} failed: {}", msg.payload.tag(), id, e);
            }
        }
    }

    /// Replies go to the `<sender>` field of the request.
    pub(crate) async fn reply(&self, request: &ControlMessage, payload: Payload) {
        let msg = self.message(&request.name, payload);
        self.send_with_retry(request.sender, &msg).await;
    }

    pub(crate) async fn recv_datagram(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    /// Resolves a control address to the owning slot's transfer address.
    pub(crate) fn transfer_addr_of(&self, control: SocketAddr) -> Option<(NodeId, SocketAddr)> {
        let id = self.membership.id_for_control(control)?;
        let endpoints = self.membership.endpoints(id)?;
        Some((id, endpoints.transfer))
    }
}

pub(crate) async fn remove_files(paths: impl IntoIterator<Item = PathBuf>) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(&path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::error!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
