use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, error, trace, warn};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;

use junction_packet::{Address, ErrorCode, RejectBuilder};
use junction_router::RouterStore;
use junction_service::{
    Account, AccountId, IlpResult, IncomingRequest, IncomingService, OutgoingRequest,
    OutgoingService,
};

use crate::packet::{
    Mode, Route, RouteControlRequest, RouteUpdateRequest, CCP_CONTROL_DESTINATION, CCP_RESPONSE,
    CCP_UPDATE_DESTINATION,
};
use crate::peer_table::{PeerRoutes, UpdateOutcome};
use crate::CcpRoutingAccount;

static RANDOM: Lazy<SystemRandom> = Lazy::new(SystemRandom::new);

/// Process-wide route distribution knobs.
#[derive(Clone, Copy, Debug)]
pub struct CcpConfig {
    pub broadcast_interval: Duration,
    pub route_expiry: Duration,
    pub hold_down_time: Duration,
}

impl Default for CcpConfig {
    fn default() -> Self {
        CcpConfig {
            broadcast_interval: Duration::from_secs(30),
            route_expiry: Duration::from_secs(45),
            hold_down_time: Duration::from_secs(45),
        }
    }
}

// One epoch's worth of changes to the forwarding table, as advertised.
struct EpochChange {
    new_routes: Vec<Route>,
    withdrawn_routes: Vec<String>,
}

#[derive(Clone, PartialEq)]
struct SelectedRoute {
    next_hop: AccountId,
    source_path: Vec<String>,
    local: bool,
}

// Selection state plus the epoch log; kept under one lock so epoch
// advancement is strictly monotonic.
#[derive(Default)]
struct ForwardingState {
    selected: HashMap<String, SelectedRoute>,
    log: Vec<EpochChange>,
}

struct PeerCursor {
    last_sent_epoch: u32,
    subscribed: bool,
}

struct Candidate {
    next_hop: AccountId,
    source_path: Vec<String>,
    weight: u32,
    local: bool,
}

impl Candidate {
    // Selection order: local terminations always win, then fewest hops,
    // then lowest weight, then smallest account id.
    fn sort_key(&self) -> (u8, usize, u32, AccountId) {
        (
            if self.local { 0 } else { 1 },
            self.source_path.len(),
            self.weight,
            self.next_hop.clone(),
        )
    }
}

/// The routing manager: handles CCP messages from peers, selects the best
/// route per prefix into the shared routing table, and broadcasts epoch
/// diffs to subscribed peers.
pub struct CcpRouteManager<I, O, S> {
    ilp_address: Address,
    global_prefix: String,
    incoming: I,
    outgoing: O,
    store: S,
    config: CcpConfig,
    forwarding_table_id: [u8; 16],
    state: Arc<RwLock<ForwardingState>>,
    peer_routes: Arc<RwLock<HashMap<AccountId, PeerRoutes>>>,
    peer_cursors: Arc<RwLock<HashMap<AccountId, PeerCursor>>>,
    hold_downs: Arc<RwLock<HashMap<String, Instant>>>,
}

impl<I, O, S> Clone for CcpRouteManager<I, O, S>
where
    I: Clone,
    O: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        CcpRouteManager {
            ilp_address: self.ilp_address.clone(),
            global_prefix: self.global_prefix.clone(),
            incoming: self.incoming.clone(),
            outgoing: self.outgoing.clone(),
            store: self.store.clone(),
            config: self.config,
            forwarding_table_id: self.forwarding_table_id,
            state: self.state.clone(),
            peer_routes: self.peer_routes.clone(),
            peer_cursors: self.peer_cursors.clone(),
            hold_downs: self.hold_downs.clone(),
        }
    }
}

impl<I, O, S> CcpRouteManager<I, O, S>
where
    I: IncomingService<S::Account> + Clone + Send + Sync + 'static,
    O: OutgoingService<S::Account> + Clone + Send + Sync + 'static,
    S: RouterStore,
    S::Account: CcpRoutingAccount,
{
    pub fn new(store: S, outgoing: O, incoming: I, config: CcpConfig) -> Self {
        let ilp_address = store.get_ilp_address();
        let global_prefix = format!("{}.", ilp_address.scheme());
        let mut forwarding_table_id = [0u8; 16];
        RANDOM
            .fill(&mut forwarding_table_id)
            .expect("system randomness is available");

        CcpRouteManager {
            ilp_address,
            global_prefix,
            incoming,
            outgoing,
            store,
            config,
            forwarding_table_id,
            state: Arc::new(RwLock::new(ForwardingState::default())),
            peer_routes: Arc::new(RwLock::new(HashMap::new())),
            peer_cursors: Arc::new(RwLock::new(HashMap::new())),
            hold_downs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn current_epoch(&self) -> u32 {
        self.state.read().log.len() as u32
    }

    /// Seeds the table with the routes this node terminates: one per account
    /// address, plus the default route through a parent when there is one.
    pub async fn reload_local_routes(&self) {
        let accounts = self.store.get_all_accounts().await;
        let mut prefixes: Vec<String> = accounts
            .iter()
            .map(|account| account.ilp_address().to_string())
            .collect();
        if accounts
            .iter()
            .any(|account| account.routing_relation() == junction_service::RoutingRelation::Parent)
        {
            prefixes.push(String::new());
        }
        self.update_best_routes(prefixes).await;
    }

    /// Spawns the periodic broadcast/expiry task.
    pub fn start(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.broadcast_interval);
            // The first tick fires immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                manager.broadcast_tick().await;
            }
        });
    }

    /// One round of route expiry plus updates to every subscribed peer.
    pub async fn broadcast_tick(&self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let mut tables = self.peer_routes.write();
            for table in tables.values_mut() {
                expired.extend(table.expire_older_than(self.config.route_expiry, now));
            }
        }
        if !expired.is_empty() {
            debug!("Withdrawing {} expired routes", expired.len());
            expired.sort();
            expired.dedup();
            self.update_best_routes(expired).await;
        }

        let subscribed: Vec<AccountId> = {
            let cursors = self.peer_cursors.read();
            cursors
                .iter()
                .filter(|(_, cursor)| cursor.subscribed)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for account_id in subscribed {
            match self.store.get_account(&account_id).await {
                Ok(account) => self.send_route_update_to(account).await,
                Err(_) => {
                    // The account is gone; forget its cursor.
                    self.peer_cursors.write().remove(&account_id);
                }
            }
        }
    }

    /// Asks `peer` to start sending us route updates, resuming from what we
    /// already have.
    pub async fn request_routes_from(&self, peer: S::Account) {
        self.send_route_control_to(peer).await;
    }

    async fn send_route_control_to(&self, peer: S::Account) {
        let (table_id, epoch) = {
            let tables = self.peer_routes.read();
            tables
                .get(&peer.id())
                .map(|table| (table.routing_table_id().unwrap_or([0; 16]), table.epoch()))
                .unwrap_or(([0; 16], 0))
        };
        let control = RouteControlRequest {
            mode: Mode::Sync,
            last_known_routing_table_id: table_id,
            last_known_epoch: epoch,
            features: Vec::new(),
        };
        debug!(
            "Requesting routes from account {} starting at epoch {}",
            peer.id(),
            epoch
        );
        let mut outgoing = self.outgoing.clone();
        let result = outgoing
            .send_request(OutgoingRequest {
                from: peer.clone(),
                to: peer.clone(),
                original_amount: 0,
                prepare: control.to_prepare(),
            })
            .await;
        if let Err(reject) = result {
            warn!(
                "Route control request to account {} was rejected: {}",
                peer.id(),
                reject.code()
            );
        }
    }

    async fn send_route_update_to(&self, peer: S::Account) {
        let update = {
            let state = self.state.read();
            let cursors = self.peer_cursors.read();
            let cursor = match cursors.get(&peer.id()) {
                Some(cursor) if cursor.subscribed => cursor,
                _ => return,
            };
            let to_epoch = state.log.len() as u32;
            let from_epoch = cursor.last_sent_epoch.min(to_epoch);
            let (new_routes, withdrawn_routes) =
                merge_epoch_range(&state.log, from_epoch as usize, to_epoch as usize);
            RouteUpdateRequest {
                routing_table_id: self.forwarding_table_id,
                current_epoch_index: to_epoch,
                from_epoch_index: from_epoch,
                to_epoch_index: to_epoch,
                hold_down_time: self.config.hold_down_time.as_millis() as u32,
                speaker: self.ilp_address.to_string(),
                new_routes,
                withdrawn_routes,
            }
        };

        let to_epoch = update.to_epoch_index;
        trace!(
            "Sending route update [{}, {}) to account {}",
            update.from_epoch_index,
            to_epoch,
            peer.id()
        );
        let mut outgoing = self.outgoing.clone();
        let result = outgoing
            .send_request(OutgoingRequest {
                from: peer.clone(),
                to: peer.clone(),
                original_amount: 0,
                prepare: update.to_prepare(),
            })
            .await;
        match result {
            Ok(_) => {
                // Only an acknowledged update advances the cursor.
                if let Some(cursor) = self.peer_cursors.write().get_mut(&peer.id()) {
                    cursor.last_sent_epoch = to_epoch;
                }
            }
            Err(reject) => {
                warn!(
                    "Route update to account {} was rejected ({}); will retry",
                    peer.id(),
                    reject.code()
                );
            }
        }
    }

    async fn handle_route_control(&mut self, request: IncomingRequest<S::Account>) -> IlpResult {
        if !request.from.should_send_routes() {
            return Err(RejectBuilder {
                code: ErrorCode::F00_BAD_REQUEST,
                message: b"we are not configured to send routes to you",
                triggered_by: Some(&self.ilp_address),
                data: &[],
            }
            .build());
        }

        let control = match RouteControlRequest::try_from_prepare(&request.prepare) {
            Ok(control) => control,
            Err(err) => {
                warn!(
                    "Invalid route control request from account {}: {}",
                    request.from.id(),
                    err
                );
                return Err(RejectBuilder {
                    code: ErrorCode::F00_BAD_REQUEST,
                    message: b"invalid route control request",
                    triggered_by: Some(&self.ilp_address),
                    data: &[],
                }
                .build());
            }
        };
        debug!(
            "Got route control request from account {}: {:?}",
            request.from.id(),
            control
        );

        let last_sent_epoch = if control.last_known_routing_table_id == self.forwarding_table_id {
            control.last_known_epoch.min(self.current_epoch())
        } else {
            // They know a previous incarnation of our table; start over.
            0
        };
        let subscribed = control.mode == Mode::Sync;
        self.peer_cursors.write().insert(
            request.from.id(),
            PeerCursor {
                last_sent_epoch,
                subscribed,
            },
        );

        if subscribed {
            self.send_route_update_to(request.from.clone()).await;
        }
        Ok(CCP_RESPONSE.clone())
    }

    async fn handle_route_update(&mut self, request: IncomingRequest<S::Account>) -> IlpResult {
        if !request.from.should_receive_routes() {
            return Err(RejectBuilder {
                code: ErrorCode::F00_BAD_REQUEST,
                message: b"your route broadcasts are not accepted here",
                triggered_by: Some(&self.ilp_address),
                data: &[],
            }
            .build());
        }

        let update = match RouteUpdateRequest::try_from_prepare(&request.prepare) {
            Ok(update) => update,
            Err(err) => {
                warn!(
                    "Invalid route update from account {}: {}",
                    request.from.id(),
                    err
                );
                // A malformed payload means we can no longer trust our view
                // of this peer; reset bilaterally.
                let dropped = {
                    let mut tables = self.peer_routes.write();
                    tables.remove(&request.from.id())
                };
                if let Some(table) = dropped {
                    let prefixes: Vec<String> = table.prefixes().cloned().collect();
                    self.update_best_routes(prefixes).await;
                }
                self.send_route_control_to(request.from.clone()).await;
                return Err(RejectBuilder {
                    code: ErrorCode::F00_BAD_REQUEST,
                    message: b"invalid route update request",
                    triggered_by: Some(&self.ilp_address),
                    data: &[],
                }
                .build());
            }
        };
        trace!(
            "Got route update from account {} covering epochs [{}, {})",
            request.from.id(),
            update.from_epoch_index,
            update.to_epoch_index
        );

        let update = self.filter_routes(update);
        let outcome = {
            let mut tables = self.peer_routes.write();
            tables
                .entry(request.from.id())
                .or_default()
                .handle_update(update, Instant::now())
        };

        let epoch_before = self.current_epoch();
        match outcome {
            UpdateOutcome::Applied(changed) => {
                if !changed.is_empty() {
                    self.update_best_routes(changed).await;
                }
            }
            UpdateOutcome::Ignored => {}
            UpdateOutcome::NeedsSync(dropped) => {
                if !dropped.is_empty() {
                    self.update_best_routes(dropped).await;
                }
                self.send_route_control_to(request.from.clone()).await;
            }
        }
        if self.current_epoch() > epoch_before {
            // Selected routes changed: push the new epoch range out now
            // rather than waiting for the next tick.
            self.spawn_broadcast();
        }
        Ok(CCP_RESPONSE.clone())
    }

    // Sends each subscribed peer its missing epoch range, off the caller's
    // path.
    fn spawn_broadcast(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let subscribed: Vec<AccountId> = {
                let cursors = manager.peer_cursors.read();
                cursors
                    .iter()
                    .filter(|(_, cursor)| cursor.subscribed)
                    .map(|(id, _)| id.clone())
                    .collect()
            };
            for account_id in subscribed {
                if let Ok(account) = manager.store.get_account(&account_id).await {
                    manager.send_route_update_to(account).await;
                }
            }
        });
    }

    /// Drops routes outside our address space and routes that would loop
    /// back through us.
    fn filter_routes(&self, mut update: RouteUpdateRequest) -> RouteUpdateRequest {
        let own_address = self.ilp_address.as_str();
        let global_prefix = &self.global_prefix;
        update.new_routes.retain(|route| {
            if !route.prefix.starts_with(global_prefix.as_str()) {
                warn!("Got route for a different address space: {}", route.prefix);
                false
            } else if route.prefix.len() <= global_prefix.len() {
                warn!("Got route broadcast for the global prefix: {}", route.prefix);
                false
            } else if route.path.iter().any(|hop| hop == own_address) {
                error!(
                    "Got route broadcast with a routing loop (path includes us): {}",
                    route.prefix
                );
                false
            } else {
                true
            }
        });
        update
    }

    /// Re-selects the best route for each of `prefixes` and records the
    /// resulting changes as a new epoch.
    async fn update_best_routes(&self, prefixes: Vec<String>) {
        if prefixes.is_empty() {
            return;
        }
        let accounts = self.store.get_all_accounts().await;
        let weights: HashMap<AccountId, u32> = accounts
            .iter()
            .map(|account| (account.id(), account.routing_weight()))
            .collect();
        let table_handle = self.store.routing_table();
        let now = Instant::now();

        let mut new_routes = Vec::new();
        let mut withdrawn_routes = Vec::new();

        let mut state = self.state.write();
        let peer_tables = self.peer_routes.read();
        let mut hold_downs = self.hold_downs.write();
        hold_downs.retain(|_, until| *until > now);

        let mut seen = HashSet::new();
        for prefix in prefixes {
            if !seen.insert(prefix.clone()) {
                continue;
            }

            let mut candidates: Vec<Candidate> = Vec::new();
            for account in &accounts {
                let is_local_prefix = account.ilp_address().as_str() == prefix;
                let is_default_via_parent = prefix.is_empty()
                    && account.routing_relation() == junction_service::RoutingRelation::Parent;
                if is_local_prefix || is_default_via_parent {
                    candidates.push(Candidate {
                        next_hop: account.id(),
                        source_path: Vec::new(),
                        weight: account.routing_weight(),
                        local: true,
                    });
                }
            }
            // Remote candidates sit out the hold-down after a withdrawal.
            let held_down = hold_downs.contains_key(&prefix);
            if !held_down {
                for (account_id, table) in peer_tables.iter() {
                    if let Some(route) = table.route_for(&prefix) {
                        candidates.push(Candidate {
                            next_hop: account_id.clone(),
                            source_path: route.path.clone(),
                            weight: weights
                                .get(account_id)
                                .copied()
                                .unwrap_or(u32::max_value()),
                            local: false,
                        });
                    }
                }
            }

            let best = candidates
                .into_iter()
                .min_by_key(|candidate| candidate.sort_key());

            match best {
                Some(candidate) => {
                    let selected = SelectedRoute {
                        next_hop: candidate.next_hop.clone(),
                        source_path: candidate.source_path.clone(),
                        local: candidate.local,
                    };
                    if state.selected.get(&prefix) == Some(&selected) {
                        continue;
                    }
                    debug!(
                        "Selected route for {} via account {}",
                        if prefix.is_empty() { "(default)" } else { prefix.as_str() },
                        selected.next_hop
                    );
                    table_handle
                        .write()
                        .insert(&prefix, candidate.next_hop.clone());
                    state.selected.insert(prefix.clone(), selected);

                    // Advertise with ourselves prepended to the path and a
                    // fresh auth token.
                    let mut path = vec![self.ilp_address.to_string()];
                    path.extend(candidate.source_path);
                    new_routes.push(Route {
                        prefix,
                        path,
                        auth: random_auth(),
                        props: Vec::new(),
                    });
                }
                None => {
                    if state.selected.remove(&prefix).is_some() {
                        debug!("Withdrawing route for {}", prefix);
                        table_handle.write().delete(&prefix);
                        hold_downs.insert(prefix.clone(), now + self.config.hold_down_time);
                        withdrawn_routes.push(prefix);
                    }
                }
            }
        }

        if !new_routes.is_empty() || !withdrawn_routes.is_empty() {
            state.log.push(EpochChange {
                new_routes,
                withdrawn_routes,
            });
            trace!("Forwarding table advanced to epoch {}", state.log.len());
        }
    }
}

fn merge_epoch_range(
    log: &[EpochChange],
    from: usize,
    to: usize,
) -> (Vec<Route>, Vec<String>) {
    let mut new_routes: HashMap<String, Route> = HashMap::new();
    let mut withdrawn: HashSet<String> = HashSet::new();
    for change in &log[from..to] {
        for prefix in &change.withdrawn_routes {
            if new_routes.remove(prefix).is_none() {
                withdrawn.insert(prefix.clone());
            }
        }
        for route in &change.new_routes {
            withdrawn.remove(&route.prefix);
            new_routes.insert(route.prefix.clone(), route.clone());
        }
    }
    let mut new_routes: Vec<Route> = new_routes.into_iter().map(|(_, route)| route).collect();
    new_routes.sort_by(|a, b| a.prefix.cmp(&b.prefix));
    let mut withdrawn: Vec<String> = withdrawn.into_iter().collect();
    withdrawn.sort();
    (new_routes, withdrawn)
}

fn random_auth() -> [u8; 32] {
    let mut auth = [0u8; 32];
    RANDOM.fill(&mut auth).expect("system randomness is available");
    auth
}

#[async_trait]
impl<I, O, S> IncomingService<S::Account> for CcpRouteManager<I, O, S>
where
    I: IncomingService<S::Account> + Clone + Send + Sync + 'static,
    O: OutgoingService<S::Account> + Clone + Send + Sync + 'static,
    S: RouterStore,
    S::Account: CcpRoutingAccount,
{
    /// Consumes CCP messages, passes everything else down the chain.
    async fn handle_request(&mut self, request: IncomingRequest<S::Account>) -> IlpResult {
        let destination = request.prepare.destination();
        if destination == *CCP_CONTROL_DESTINATION {
            self.handle_route_control(request).await
        } else if destination == *CCP_UPDATE_DESTINATION {
            self.handle_route_update(request).await
        } else {
            self.incoming.handle_request(request).await
        }
    }
}
