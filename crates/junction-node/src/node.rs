use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use thiserror::Error;

use junction_ccp::{CcpConfig, CcpRouteManager, CcpRoutingAccount};
use junction_link::{LinkService, LinkTransport, MoneyHandler};
use junction_packet::Address;
use junction_router::Router;
use junction_service::{
    AccountId, AccountStore, BoxedIncomingService, BoxedOutgoingService,
};
use junction_service_util::{
    DedupService, ExchangeRateService, ExchangeRateStore, ExpiryShortenerService,
    MaxPacketAmountService, NodeStats, RateLimitService, StatsService, ValidatorService,
};
use junction_settlement::{
    BalanceService, BalanceStore, EngineRegistry, SettlementController, SettlementControllers,
    SettlementEngine, SettlementMessageService,
};
use junction_store::{Account, InMemoryStore};

use crate::config::NodeConfig;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown account: {0}")]
    UnknownAccount(String),
    #[error("account {0} has no settlement engine")]
    NoEngine(String),
}

type NodeOutgoing = BoxedOutgoingService<Account>;
type NodeIncoming = BoxedIncomingService<Account>;
type NodeControllers = SettlementControllers<Account, NodeOutgoing>;
type NodeCcp = CcpRouteManager<NodeIncoming, NodeOutgoing, InMemoryStore>;

/// A configured, not-yet-started node.
pub struct JunctionNode {
    config: NodeConfig,
}

impl JunctionNode {
    pub fn new(config: NodeConfig) -> Self {
        JunctionNode { config }
    }

    /// Boots the store and accounts, composes both service chains, seeds the
    /// routing table, and starts the broadcast timer. The returned handle
    /// services peer links for both roles.
    pub async fn start(&self) -> Result<NodeHandle, NodeError> {
        let ilp_address = self.config.parsed_ilp_address()?;
        info!("Starting junction node with ILP address {}", ilp_address);

        let store = InMemoryStore::new(ilp_address.clone());
        for account_config in &self.config.accounts {
            let account = Account::try_from(account_config)?;
            store
                .add_account(account)
                .map_err(|err| NodeError::InvalidConfig(err.to_string()))?;
        }
        if !self.config.exchange_rates.is_empty() {
            store.set_exchange_rates(self.config.exchange_rates.clone());
        }

        let links: LinkService<Account> = LinkService::new(ilp_address.clone());
        let stats = NodeStats::new();
        let controllers: NodeControllers = SettlementControllers::new();
        let engines = EngineRegistry::new();

        // Outgoing chain, innermost (egress link) out: stats, the hop
        // deadline and fulfillment check, expiry shortening, balance
        // accounting, dedup, and the rate conversion on the outside so every
        // later stage sees the egress amount.
        let outgoing = StatsService::new(stats.clone(), links.clone());
        let outgoing = ValidatorService::outgoing(store.clone(), outgoing);
        // The shortener runs before the validator so the deadline it checks
        // is the shortened one.
        let outgoing = ExpiryShortenerService::new(store.clone(), outgoing)
            .with_min_message_window(self.config.min_message_window());
        let outgoing = BalanceService::new(store.clone(), controllers.clone(), outgoing);
        let outgoing = DedupService::new(outgoing);
        let outgoing = ExchangeRateService::new(
            self.config.exchange_rate_spread,
            store.clone(),
            outgoing,
        );
        let outgoing = BoxedOutgoingService::new(outgoing);

        // Settlement messages bypass balance/dedup/rate stages; they carry no
        // value and must go out even while the account is saturated.
        let controller_outgoing =
            BoxedOutgoingService::new(ValidatorService::outgoing(store.clone(), links.clone()));

        // Incoming chain, innermost (router) out.
        let router = Router::new(store.clone(), outgoing.clone())
            .with_reflect_payments(self.config.reflect_payments);
        let ccp = CcpRouteManager::new(
            store.clone(),
            outgoing.clone(),
            BoxedIncomingService::new(router),
            CcpConfig {
                broadcast_interval: Duration::from_millis(self.config.route_broadcast_interval_ms),
                route_expiry: Duration::from_millis(self.config.route_expiry_interval_ms),
                hold_down_time: Duration::from_millis(self.config.hold_down_time_ms),
            },
        );
        let incoming =
            SettlementMessageService::new(store.clone(), engines.clone(), ccp.clone());
        let incoming = StatsService::new(stats.clone(), incoming);
        let incoming = MaxPacketAmountService::new(store.clone(), incoming);
        let incoming = ValidatorService::incoming(store.clone(), incoming);
        let incoming = RateLimitService::new(store.clone(), incoming);
        let incoming = BoxedIncomingService::new(incoming);

        ccp.reload_local_routes().await;
        ccp.start();

        Ok(NodeHandle {
            ilp_address,
            store,
            links,
            engines,
            controllers,
            incoming,
            controller_outgoing,
            ccp,
            stats,
        })
    }
}

/// A running node.
pub struct NodeHandle {
    ilp_address: Address,
    store: InMemoryStore,
    links: LinkService<Account>,
    engines: EngineRegistry,
    controllers: NodeControllers,
    incoming: NodeIncoming,
    controller_outgoing: NodeOutgoing,
    ccp: NodeCcp,
    stats: NodeStats,
}

#[derive(Clone)]
struct NodeMoneyHandler {
    store: InMemoryStore,
    controllers: NodeControllers,
}

#[async_trait]
impl MoneyHandler<Account> for NodeMoneyHandler {
    async fn handle_money(&self, from: Account, amount: u64) {
        use junction_service::Account as _;
        let account_id = from.id();
        if let Some(controller) = self.controllers.get(&account_id) {
            controller.handle_incoming_transfer(amount);
        } else if let Some(tracker) = self.store.balance_tracker(&account_id) {
            tracker.force_sub_balance(amount);
        } else {
            warn!("Dropping transfer of {} from unknown account {}", amount, account_id);
        }
    }
}

impl NodeHandle {
    pub fn ilp_address(&self) -> &Address {
        &self.ilp_address
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Gives an account a settlement engine, creating its settlement
    /// controller.
    pub async fn register_engine(
        &self,
        account_id: &AccountId,
        engine: Arc<dyn SettlementEngine>,
    ) -> Result<(), NodeError> {
        let account = self
            .store
            .get_account(account_id)
            .await
            .map_err(|_| NodeError::UnknownAccount(account_id.to_string()))?;
        let tracker = self
            .store
            .balance_tracker(account_id)
            .ok_or_else(|| NodeError::UnknownAccount(account_id.to_string()))?;
        let controller = Arc::new(SettlementController::new(
            account,
            tracker,
            engine.clone(),
            self.controller_outgoing.clone(),
        ));
        self.engines.register(account_id.clone(), engine);
        self.controllers.register(account_id.clone(), controller);
        Ok(())
    }

    /// Attaches a transport for the given account and runs the connect-time
    /// protocol exchanges (route sync, settlement peering) in the background.
    pub async fn attach_link(
        &self,
        account_id: &AccountId,
        transport: LinkTransport,
    ) -> Result<(), NodeError> {
        let account = self
            .store
            .get_account(account_id)
            .await
            .map_err(|_| NodeError::UnknownAccount(account_id.to_string()))?;

        let money_handler = NodeMoneyHandler {
            store: self.store.clone(),
            controllers: self.controllers.clone(),
        };
        self.links
            .attach(account.clone(), transport, self.incoming.clone(), money_handler);

        // Connect-time exchanges await the peer's answers, so they run off
        // the caller's path.
        if account.should_receive_routes() {
            let ccp = self.ccp.clone();
            let account = account.clone();
            tokio::spawn(async move {
                ccp.request_routes_from(account).await;
            });
        }
        if let Some(controller) = self.controllers.get(account_id) {
            let settle_on_connect = account.settle_on_connect();
            tokio::spawn(async move {
                if let Err(err) = controller.exchange_peering().await {
                    warn!("Settlement peering failed: {}", err);
                }
                if settle_on_connect {
                    controller.trigger();
                }
            });
        }
        Ok(())
    }

    /// Drops the link for an account.
    pub fn detach_link(&self, account_id: &AccountId) {
        self.links.detach(account_id);
    }

    /// Called by settlement-engine glue when an incoming credit arrives for
    /// an artifact we issued. Returns the credited amount unless it was a
    /// duplicate or unknown artifact.
    pub fn notify_incoming_credit(
        &self,
        account_id: &AccountId,
        artifact: &str,
        amount: u64,
    ) -> Option<u64> {
        self.controllers
            .get(account_id)?
            .handle_incoming_credit(artifact, amount)
    }
}
