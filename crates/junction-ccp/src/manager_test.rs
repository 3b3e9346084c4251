use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use junction_packet::{Address, ErrorCode, Prepare};
use junction_router::{RouterStore, RoutingTable};
use junction_service::{
    incoming_service_fn, outgoing_service_fn, Account, AccountId, AccountStore, AddressStore,
    AddressStoreError, AccountStoreError, IncomingRequest, IncomingService, OutgoingRequest,
    RoutingRelation,
};

use crate::fixtures::*;
use crate::manager::{CcpConfig, CcpRouteManager};
use crate::packet::{
    Mode, Route, RouteControlRequest, RouteUpdateRequest, CCP_RESPONSE,
};
use crate::CcpRoutingAccount;

#[derive(Clone, Debug)]
struct TestAccount {
    id: AccountId,
    address: Address,
    relation: RoutingRelation,
}

impl TestAccount {
    fn new(id: &str, relation: RoutingRelation) -> Self {
        TestAccount {
            id: AccountId::from_str(id).unwrap(),
            address: Address::from_str(&format!("example.{}", id)).unwrap(),
            relation,
        }
    }
}

impl Account for TestAccount {
    fn id(&self) -> AccountId {
        self.id.clone()
    }

    fn ilp_address(&self) -> &Address {
        &self.address
    }

    fn asset_code(&self) -> &str {
        "XYZ"
    }

    fn asset_scale(&self) -> u8 {
        9
    }
}

impl CcpRoutingAccount for TestAccount {
    fn routing_relation(&self) -> RoutingRelation {
        self.relation
    }
}

#[derive(Clone)]
struct TestStore {
    accounts: Vec<TestAccount>,
    table: Arc<RwLock<RoutingTable<AccountId>>>,
}

impl TestStore {
    fn new(accounts: Vec<TestAccount>) -> Self {
        TestStore {
            accounts,
            table: Arc::new(RwLock::new(RoutingTable::new())),
        }
    }
}

#[async_trait]
impl AccountStore for TestStore {
    type Account = TestAccount;

    async fn get_account(&self, id: &AccountId) -> Result<TestAccount, AccountStoreError> {
        self.accounts
            .iter()
            .find(|account| account.id == *id)
            .cloned()
            .ok_or_else(|| AccountStoreError::AccountNotFound(id.to_string()))
    }

    async fn get_all_accounts(&self) -> Vec<TestAccount> {
        self.accounts.clone()
    }
}

#[async_trait]
impl AddressStore for TestStore {
    async fn set_ilp_address(&self, _: Address) -> Result<(), AddressStoreError> {
        unimplemented!()
    }

    async fn clear_ilp_address(&self) -> Result<(), AddressStoreError> {
        unimplemented!()
    }

    fn get_ilp_address(&self) -> Address {
        Address::new("example.connector")
    }
}

impl RouterStore for TestStore {
    fn routing_table(&self) -> Arc<RwLock<RoutingTable<AccountId>>> {
        self.table.clone()
    }
}

type Sent = Arc<Mutex<Vec<(AccountId, Prepare)>>>;

fn test_manager(
    accounts: Vec<TestAccount>,
    config: CcpConfig,
) -> (
    CcpRouteManager<
        impl IncomingService<TestAccount> + Clone + Send + Sync + 'static,
        impl junction_service::OutgoingService<TestAccount> + Clone + Send + Sync + 'static,
        TestStore,
    >,
    TestStore,
    Sent,
) {
    let store = TestStore::new(accounts);
    let sent: Sent = Arc::new(Mutex::new(Vec::new()));
    let sent_clone = sent.clone();
    let outgoing = outgoing_service_fn(move |request: OutgoingRequest<TestAccount>| {
        sent_clone.lock().push((request.to.id(), request.prepare));
        Ok(CCP_RESPONSE.clone())
    });
    let incoming = incoming_service_fn(|_request: IncomingRequest<TestAccount>| {
        Err(junction_packet::RejectBuilder {
            code: ErrorCode::F02_UNREACHABLE,
            message: b"no other incoming handler",
            triggered_by: None,
            data: &[],
        }
        .build())
    });
    let manager = CcpRouteManager::new(store.clone(), outgoing, incoming, config);
    (manager, store, sent)
}

fn zero_hold_down() -> CcpConfig {
    CcpConfig {
        hold_down_time: Duration::from_millis(0),
        ..CcpConfig::default()
    }
}

fn update_from(
    routes: Vec<Route>,
    withdrawn: Vec<String>,
    from_epoch: u32,
    to_epoch: u32,
) -> RouteUpdateRequest {
    RouteUpdateRequest {
        routing_table_id: ROUTING_TABLE_ID,
        current_epoch_index: to_epoch,
        from_epoch_index: from_epoch,
        to_epoch_index: to_epoch,
        hold_down_time: 30_000,
        speaker: "example.peer-a".to_string(),
        new_routes: routes,
        withdrawn_routes: withdrawn,
    }
}

fn route(prefix: &str, path: &[&str]) -> Route {
    Route {
        prefix: prefix.to_string(),
        path: path.iter().map(|hop| hop.to_string()).collect(),
        auth: [1; 32],
        props: Vec::new(),
    }
}

fn resolve(store: &TestStore, address: &str) -> Option<AccountId> {
    store.table.read().resolve(address).cloned()
}

mod route_control {
    use super::*;

    #[tokio::test]
    async fn rejects_control_from_non_sending_account() {
        let (mut manager, _store, _sent) =
            test_manager(vec![TestAccount::new("parent-a", RoutingRelation::Parent)], zero_hold_down());
        let reject = manager
            .handle_request(IncomingRequest {
                from: TestAccount::new("parent-a", RoutingRelation::Parent),
                prepare: CONTROL_REQUEST.to_prepare(),
            })
            .await
            .unwrap_err();
        assert_eq!(reject.code(), ErrorCode::F00_BAD_REQUEST);
    }

    #[tokio::test]
    async fn subscribes_peer_and_sends_current_table() {
        let peer = TestAccount::new("peer-a", RoutingRelation::Peer);
        let (mut manager, _store, sent) = test_manager(vec![peer.clone()], zero_hold_down());
        manager.reload_local_routes().await;

        let control = RouteControlRequest {
            mode: Mode::Sync,
            last_known_routing_table_id: [0; 16],
            last_known_epoch: 0,
            features: Vec::new(),
        };
        manager
            .handle_request(IncomingRequest {
                from: peer.clone(),
                prepare: control.to_prepare(),
            })
            .await
            .unwrap();

        let sent = sent.lock();
        assert_eq!(sent.len(), 1);
        let update = RouteUpdateRequest::try_from_prepare(&sent[0].1).unwrap();
        assert_eq!(update.from_epoch_index, 0);
        assert_eq!(update.to_epoch_index, 1);
        // The local route is advertised with us prepended to the path.
        assert_eq!(update.new_routes.len(), 1);
        assert_eq!(update.new_routes[0].prefix, "example.peer-a");
        assert_eq!(update.new_routes[0].path, vec!["example.connector".to_string()]);
        assert_eq!(update.speaker, "example.connector");
    }

    #[tokio::test]
    async fn rejects_invalid_control_payload() {
        let peer = TestAccount::new("peer-a", RoutingRelation::Peer);
        let (mut manager, _store, _sent) = test_manager(vec![peer.clone()], zero_hold_down());
        let prepare = junction_packet::PrepareBuilder {
            destination: crate::packet::CCP_CONTROL_DESTINATION.clone(),
            amount: 0,
            expires_at: std::time::SystemTime::now() + Duration::from_secs(30),
            execution_condition: &crate::packet::PEER_PROTOCOL_CONDITION,
            data: &[],
        }
        .build();
        let reject = manager
            .handle_request(IncomingRequest {
                from: peer,
                prepare,
            })
            .await
            .unwrap_err();
        assert_eq!(reject.code(), ErrorCode::F00_BAD_REQUEST);
    }
}

mod route_updates {
    use super::*;

    #[tokio::test]
    async fn applies_updates_into_the_routing_table() {
        let peer = TestAccount::new("peer-a", RoutingRelation::Peer);
        let (mut manager, store, _sent) = test_manager(vec![peer.clone()], zero_hold_down());

        let update = update_from(
            vec![route("example.prefix1", &["example.peer-a"])],
            vec![],
            0,
            1,
        );
        manager
            .handle_request(IncomingRequest {
                from: peer.clone(),
                prepare: update.to_prepare(),
            })
            .await
            .unwrap();

        assert_eq!(resolve(&store, "example.prefix1").unwrap().as_str(), "peer-a");
        assert_eq!(resolve(&store, "example.prefix1.sub").unwrap().as_str(), "peer-a");
        assert_eq!(manager.current_epoch(), 1);
    }

    #[tokio::test]
    async fn rejects_updates_from_non_receiving_account() {
        let child = TestAccount::new("child-a", RoutingRelation::Child);
        let (mut manager, _store, _sent) = test_manager(vec![child.clone()], zero_hold_down());
        let update = update_from(vec![route("example.prefix1", &[])], vec![], 0, 1);
        let reject = manager
            .handle_request(IncomingRequest {
                from: child,
                prepare: update.to_prepare(),
            })
            .await
            .unwrap_err();
        assert_eq!(reject.code(), ErrorCode::F00_BAD_REQUEST);
    }

    #[tokio::test]
    async fn filters_looping_and_foreign_routes() {
        let peer = TestAccount::new("peer-a", RoutingRelation::Peer);
        let (mut manager, store, _sent) = test_manager(vec![peer.clone()], zero_hold_down());

        let update = update_from(
            vec![
                route("example.looped", &["example.x", "example.connector"]),
                route("other.space", &[]),
                route("example.", &[]),
            ],
            vec![],
            0,
            1,
        );
        manager
            .handle_request(IncomingRequest {
                from: peer,
                prepare: update.to_prepare(),
            })
            .await
            .unwrap();

        assert!(resolve(&store, "example.looped").is_none());
        assert!(resolve(&store, "other.space").is_none());
        // Nothing selected, so the epoch did not move.
        assert_eq!(manager.current_epoch(), 0);
    }

    #[tokio::test]
    async fn local_routes_beat_remote_advertisements() {
        let peer = TestAccount::new("peer-a", RoutingRelation::Peer);
        let child = TestAccount::new("prefix1", RoutingRelation::Child);
        let (mut manager, store, _sent) =
            test_manager(vec![peer.clone(), child.clone()], zero_hold_down());
        manager.reload_local_routes().await;
        assert_eq!(resolve(&store, "example.prefix1").unwrap().as_str(), "prefix1");

        let update = update_from(
            vec![route("example.prefix1", &["example.peer-a"])],
            vec![],
            0,
            1,
        );
        manager
            .handle_request(IncomingRequest {
                from: peer,
                prepare: update.to_prepare(),
            })
            .await
            .unwrap();

        assert_eq!(resolve(&store, "example.prefix1").unwrap().as_str(), "prefix1");
    }

    #[tokio::test]
    async fn selects_by_path_length_then_weight_then_id() {
        let peer_a = TestAccount::new("peer-a", RoutingRelation::Peer);
        let peer_b = TestAccount::new("peer-b", RoutingRelation::Peer);
        let (mut manager, store, _sent) =
            test_manager(vec![peer_a.clone(), peer_b.clone()], zero_hold_down());

        // peer-a advertises a two-hop path first.
        manager
            .handle_request(IncomingRequest {
                from: peer_a.clone(),
                prepare: update_from(
                    vec![route("example.dest", &["example.mid", "example.origin"])],
                    vec![],
                    0,
                    1,
                )
                .to_prepare(),
            })
            .await
            .unwrap();
        assert_eq!(resolve(&store, "example.dest").unwrap().as_str(), "peer-a");

        // peer-b advertises a shorter path and wins.
        manager
            .handle_request(IncomingRequest {
                from: peer_b.clone(),
                prepare: update_from(vec![route("example.dest", &["example.origin"])], vec![], 0, 1)
                    .to_prepare(),
            })
            .await
            .unwrap();
        assert_eq!(resolve(&store, "example.dest").unwrap().as_str(), "peer-b");

        // Same path length: the tie breaks on the lower account id.
        manager
            .handle_request(IncomingRequest {
                from: peer_a.clone(),
                prepare: update_from(vec![route("example.dest", &["example.origin"])], vec![], 1, 2)
                    .to_prepare(),
            })
            .await
            .unwrap();
        assert_eq!(resolve(&store, "example.dest").unwrap().as_str(), "peer-a");
    }

    #[tokio::test]
    async fn withdrawing_and_re_adding_advances_the_epoch() {
        let peer = TestAccount::new("peer-a", RoutingRelation::Peer);
        let (mut manager, store, _sent) = test_manager(vec![peer.clone()], zero_hold_down());

        manager
            .handle_request(IncomingRequest {
                from: peer.clone(),
                prepare: update_from(vec![route("example.dest", &[])], vec![], 0, 1).to_prepare(),
            })
            .await
            .unwrap();
        let epoch_after_add = manager.current_epoch();

        manager
            .handle_request(IncomingRequest {
                from: peer.clone(),
                prepare: update_from(vec![], vec!["example.dest".to_string()], 1, 2).to_prepare(),
            })
            .await
            .unwrap();
        let epoch_after_withdraw = manager.current_epoch();
        assert!(epoch_after_withdraw > epoch_after_add);
        assert!(resolve(&store, "example.dest").is_none());

        manager
            .handle_request(IncomingRequest {
                from: peer.clone(),
                prepare: update_from(vec![route("example.dest", &[])], vec![], 2, 3).to_prepare(),
            })
            .await
            .unwrap();
        let epoch_after_re_add = manager.current_epoch();
        assert!(epoch_after_re_add > epoch_after_withdraw);
        assert_eq!(resolve(&store, "example.dest").unwrap().as_str(), "peer-a");
    }

    #[tokio::test]
    async fn hold_down_suppresses_reselection() {
        let peer = TestAccount::new("peer-a", RoutingRelation::Peer);
        let config = CcpConfig {
            hold_down_time: Duration::from_secs(60),
            ..CcpConfig::default()
        };
        let (mut manager, store, _sent) = test_manager(vec![peer.clone()], config);

        manager
            .handle_request(IncomingRequest {
                from: peer.clone(),
                prepare: update_from(vec![route("example.flappy", &[])], vec![], 0, 1).to_prepare(),
            })
            .await
            .unwrap();
        manager
            .handle_request(IncomingRequest {
                from: peer.clone(),
                prepare: update_from(vec![], vec!["example.flappy".to_string()], 1, 2).to_prepare(),
            })
            .await
            .unwrap();
        assert!(resolve(&store, "example.flappy").is_none());

        // Re-advertised while held down: stays unreachable.
        manager
            .handle_request(IncomingRequest {
                from: peer.clone(),
                prepare: update_from(vec![route("example.flappy", &[])], vec![], 2, 3).to_prepare(),
            })
            .await
            .unwrap();
        assert!(resolve(&store, "example.flappy").is_none());
    }

    #[tokio::test]
    async fn epoch_gap_resets_peer_state_and_requests_sync() {
        let peer = TestAccount::new("peer-a", RoutingRelation::Peer);
        let (mut manager, store, sent) = test_manager(vec![peer.clone()], zero_hold_down());

        manager
            .handle_request(IncomingRequest {
                from: peer.clone(),
                prepare: update_from(vec![route("example.dest", &[])], vec![], 0, 2).to_prepare(),
            })
            .await
            .unwrap();
        assert!(resolve(&store, "example.dest").is_some());

        // An update from epoch 5 when we only have 2 is a gap.
        manager
            .handle_request(IncomingRequest {
                from: peer.clone(),
                prepare: update_from(vec![route("example.other", &[])], vec![], 5, 6).to_prepare(),
            })
            .await
            .unwrap();

        // The peer's routes are gone and a SYNC control went out.
        assert!(resolve(&store, "example.dest").is_none());
        let sent = sent.lock();
        let control = sent
            .iter()
            .rev()
            .find_map(|(to, prepare)| {
                RouteControlRequest::try_from_without_expiry(prepare)
                    .ok()
                    .map(|control| (to.clone(), control))
            })
            .expect("expected a route control request");
        assert_eq!(control.0.as_str(), "peer-a");
        assert_eq!(control.1.mode, Mode::Sync);
        assert_eq!(control.1.last_known_epoch, 0);
    }
}

mod broadcast {
    use super::*;

    #[tokio::test]
    async fn cursor_advances_only_after_acknowledged_send() {
        let peer_a = TestAccount::new("peer-a", RoutingRelation::Peer);
        let peer_b = TestAccount::new("peer-b", RoutingRelation::Peer);
        let (mut manager, _store, sent) =
            test_manager(vec![peer_a.clone(), peer_b.clone()], zero_hold_down());

        // peer-a teaches us a route while nobody is subscribed yet.
        manager
            .handle_request(IncomingRequest {
                from: peer_a.clone(),
                prepare: update_from(vec![route("example.dest", &["example.peer-a"])], vec![], 0, 1)
                    .to_prepare(),
            })
            .await
            .unwrap();
        sent.lock().clear();

        // peer-b subscribes and immediately receives the backlog.
        manager
            .handle_request(IncomingRequest {
                from: peer_b.clone(),
                prepare: RouteControlRequest {
                    mode: Mode::Sync,
                    last_known_routing_table_id: [0; 16],
                    last_known_epoch: 0,
                    features: Vec::new(),
                }
                .to_prepare(),
            })
            .await
            .unwrap();
        {
            let sent = sent.lock();
            let to_peer_b: Vec<_> = sent
                .iter()
                .filter(|(to, _)| to.as_str() == "peer-b")
                .collect();
            assert_eq!(to_peer_b.len(), 1);
            let update = RouteUpdateRequest::try_from_prepare(&to_peer_b[0].1).unwrap();
            assert_eq!(update.from_epoch_index, 0);
            assert_eq!(update.to_epoch_index, 1);
            assert_eq!(update.new_routes.len(), 1);
            assert_eq!(
                update.new_routes[0].path,
                vec!["example.connector".to_string(), "example.peer-a".to_string()]
            );
        }

        // That send fulfilled, so the next tick is a heartbeat.
        sent.lock().clear();
        manager.broadcast_tick().await;
        let sent = sent.lock();
        let update = sent
            .iter()
            .find(|(to, _)| to.as_str() == "peer-b")
            .map(|(_, prepare)| RouteUpdateRequest::try_from_prepare(prepare).unwrap())
            .unwrap();
        assert_eq!(update.from_epoch_index, 1);
        assert_eq!(update.to_epoch_index, 1);
        assert!(update.is_heartbeat());
    }
}
