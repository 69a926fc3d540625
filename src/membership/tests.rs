//! Membership Module Tests
//!
//! Validates the roster contract and the gossip service state machine.
//!
//! ## Test Scopes
//! - **Data Structures**: ordering of ids and serialization of the gossip wire protocol.
//! - **Static Roster**: status changes, shared views, control-address lookup.
//! - **Gossip Service**: join through an introducer, voluntary leave, status mapping.

#[cfg(test)]
mod tests {
    use crate::membership::roster::StaticRoster;
    use crate::membership::service::{MembershipService, SlotConfig};
    use crate::membership::types::{
        Endpoints, GossipMessage, MemberDigest, Membership, NodeId, NodeState, NodeStatus,
    };
    use std::net::SocketAddr;
    use std::time::Duration;

    fn endpoints(port: u16) -> Endpoints {
        Endpoints {
            control: SocketAddr::from(([127, 0, 0, 1], port)),
            transfer: SocketAddr::from(([127, 0, 0, 1], port + 1000)),
        }
    }

    fn roster(local: u16, size: u16) -> StaticRoster {
        StaticRoster::new(
            NodeId(local),
            (1..=size).map(|id| (NodeId(id), endpoints(20000 + id))),
        )
    }

    // ============================================================
    // NODE ID TESTS
    // ============================================================

    #[test]
    fn test_node_id_ordering() {
        let mut ids = vec![NodeId(7), NodeId(2), NodeId(10), NodeId(5)];
        ids.sort();
        assert_eq!(ids, vec![NodeId(2), NodeId(5), NodeId(7), NodeId(10)]);
        assert_eq!(ids.iter().max(), Some(&NodeId(10)));
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId(9).to_string(), "9");
    }

    // ============================================================
    // GOSSIP MESSAGE TESTS
    // ============================================================

    #[test]
    fn test_ack_bincode_serialization() {
        let msg = GossipMessage::Ack {
            from: NodeId(3),
            incarnation: 4,
            members: vec![
                MemberDigest {
                    id: NodeId(1),
                    state: NodeState::Alive,
                    incarnation: 2,
                },
                MemberDigest {
                    id: NodeId(2),
                    state: NodeState::Dead,
                    incarnation: 7,
                },
            ],
        };

        let encoded = bincode::serialize(&msg).expect("Bincode serialization failed");
        let restored: GossipMessage =
            bincode::deserialize(&encoded).expect("Bincode deserialization failed");

        match restored {
            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                assert_eq!(from, NodeId(3));
                assert_eq!(incarnation, 4);
                assert_eq!(members.len(), 2);
                assert_eq!(members[1].state, NodeState::Dead);
            }
            other => panic!("Expected Ack, got {:?}", other),
        }
    }

    #[test]
    fn test_endpoints_json_serialization() {
        let ep = endpoints(5001);
        let json = serde_json::to_string(&ep).expect("Serialization failed");
        let restored: Endpoints = serde_json::from_str(&json).expect("Deserialization failed");
        assert_eq!(restored, ep);
    }

    // ============================================================
    // STATIC ROSTER TESTS
    // ============================================================

    #[test]
    fn test_roster_starts_all_active() {
        let roster = roster(1, 10);

        assert_eq!(roster.all_ids().len(), 10);
        assert!(roster.all_ids().iter().all(|id| roster.is_active(*id)));
        assert_eq!(roster.local_id(), NodeId(1));
    }

    #[test]
    fn test_roster_unknown_slot_is_inactive() {
        let roster = roster(1, 4);

        assert_eq!(roster.status(NodeId(11)), NodeStatus::Inactive);
        assert!(roster.endpoints(NodeId(11)).is_none());
    }

    #[test]
    fn test_roster_views_share_status() {
        let a = roster(1, 5);
        let b = a.view_as(NodeId(4));

        a.set_status(NodeId(3), NodeStatus::Inactive);

        assert_eq!(b.local_id(), NodeId(4));
        assert_eq!(b.status(NodeId(3)), NodeStatus::Inactive);

        b.set_status(NodeId(3), NodeStatus::Active);
        assert!(a.is_active(NodeId(3)));
    }

    #[test]
    fn test_roster_id_for_control() {
        let roster = roster(1, 5);

        let addr = endpoints(20003).control;
        assert_eq!(roster.id_for_control(addr), Some(NodeId(3)));

        let stranger: SocketAddr = "10.1.2.3:9".parse().unwrap();
        assert_eq!(roster.id_for_control(stranger), None);
    }

    // ============================================================
    // GOSSIP SERVICE TESTS
    // ============================================================

    fn bind_free() -> SocketAddr {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap()
    }

    fn slots(size: u16) -> Vec<SlotConfig> {
        (1..=size)
            .map(|id| SlotConfig {
                id: NodeId(id),
                gossip_addr: bind_free(),
                endpoints: endpoints(21000 + id),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_unknown_local_slot_is_rejected() {
        let result = MembershipService::new(NodeId(9), slots(2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_join_through_introducer() {
        let table = slots(2);

        let introducer = MembershipService::new(NodeId(1), table.clone()).await.unwrap();
        let joiner = MembershipService::new(NodeId(2), table).await.unwrap();

        introducer.bootstrap().await;
        introducer.clone().start().await;
        joiner.clone().start().await;

        joiner.join(NodeId(1)).await.unwrap();

        let mut converged = false;
        for _ in 0..50 {
            if introducer.is_active(NodeId(2)) && joiner.is_active(NodeId(1)) {
                converged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert!(converged, "Both slots should see each other as Active");
    }

    #[tokio::test]
    async fn test_leave_marks_local_inactive() {
        let service = MembershipService::new(NodeId(1), slots(1)).await.unwrap();

        service.bootstrap().await;
        assert!(service.is_active(NodeId(1)));

        service.leave().await;
        assert!(!service.is_local_alive());
        assert_eq!(service.status(NodeId(1)), NodeStatus::Inactive);
    }

    #[tokio::test]
    async fn test_list_members_is_ordered() {
        let service = MembershipService::new(NodeId(2), slots(4)).await.unwrap();

        let ids: Vec<NodeId> = service.list_members().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![NodeId(1), NodeId(2), NodeId(3), NodeId(4)]);
    }
}
