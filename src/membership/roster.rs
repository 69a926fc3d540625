//! In-memory roster.
//!
//! Holds a fixed slot table whose statuses are set explicitly by the owner.
//! Used by embedders that run their own failure detector, and by tests that
//! need to flip a slot to `Inactive` deterministically.

use super::types::{Endpoints, Membership, NodeId, NodeStatus};

use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Slot {
    endpoints: Endpoints,
    status: NodeStatus,
}

#[derive(Debug)]
pub struct StaticRoster {
    local_id: NodeId,
    slots: Arc<DashMap<NodeId, Slot>>,
}

impl StaticRoster {
    /// Creates a roster with every slot `Active`.
    pub fn new(local_id: NodeId, slots: impl IntoIterator<Item = (NodeId, Endpoints)>) -> Self {
        let table = DashMap::new();
        for (id, endpoints) in slots {
            table.insert(
                id,
                Slot {
                    endpoints,
                    status: NodeStatus::Active,
                },
            );
        }

        Self {
            local_id,
            slots: Arc::new(table),
        }
    }

    /// Returns a view of the same slot table as seen from another slot.
    ///
    /// Status changes made through any view are visible to all of them, which
    /// models a perfectly converged failure detector.
    pub fn view_as(&self, local_id: NodeId) -> Self {
        Self {
            local_id,
            slots: self.slots.clone(),
        }
    }

    pub fn set_status(&self, id: NodeId, status: NodeStatus) {
        if let Some(mut slot) = self.slots.get_mut(&id) {
            tracing::info!("Roster: slot {} is now {:?}", id, status);
            slot.status = status;
        }
    }
}

impl Membership for StaticRoster {
    fn local_id(&self) -> NodeId {
        self.local_id
    }

    fn status(&self, id: NodeId) -> NodeStatus {
        self.slots
            .get(&id)
            .map(|slot| slot.status)
            .unwrap_or(NodeStatus::Inactive)
    }

    fn endpoints(&self, id: NodeId) -> Option<Endpoints> {
        self.slots.get(&id).map(|slot| slot.endpoints)
    }

    fn all_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.slots.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }
}
