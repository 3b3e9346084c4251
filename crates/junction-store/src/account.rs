use std::sync::Arc;
use std::time::Duration;

use junction_ccp::CcpRoutingAccount;
use junction_packet::Address;
use junction_service::{Account as AccountTrait, AccountId, RoutingRelation};
use junction_service_util::{
    DedupAccount, MaxPacketAmountAccount, RateLimitAccount, RateLimitSettings,
};
use junction_settlement::BalanceSettings;

/// A configured peer account. Cheap to clone; the attributes live behind an
/// `Arc` and never change after construction (mutable state belongs to the
/// account's balance tracker).
#[derive(Clone, Debug)]
pub struct Account {
    inner: Arc<AccountInner>,
}

#[derive(Debug)]
struct AccountInner {
    id: AccountId,
    ilp_address: Address,
    asset_code: String,
    asset_scale: u8,
    relation: RoutingRelation,
    routing_weight: u32,
    max_packet_amount: u64,
    balance: BalanceSettings,
    rate_limit: Option<RateLimitSettings>,
    amount_per_minute_limit: Option<u64>,
    dedup_window: Option<Duration>,
    settle_on_connect: bool,
}

impl Account {
    pub fn balance_settings(&self) -> &BalanceSettings {
        &self.inner.balance
    }

    pub fn settle_on_connect(&self) -> bool {
        self.inner.settle_on_connect
    }
}

impl AccountTrait for Account {
    fn id(&self) -> AccountId {
        self.inner.id.clone()
    }

    fn ilp_address(&self) -> &Address {
        &self.inner.ilp_address
    }

    fn asset_code(&self) -> &str {
        &self.inner.asset_code
    }

    fn asset_scale(&self) -> u8 {
        self.inner.asset_scale
    }
}

impl CcpRoutingAccount for Account {
    fn routing_relation(&self) -> RoutingRelation {
        self.inner.relation
    }

    fn routing_weight(&self) -> u32 {
        self.inner.routing_weight
    }
}

impl MaxPacketAmountAccount for Account {
    fn max_packet_amount(&self) -> u64 {
        self.inner.max_packet_amount
    }
}

impl RateLimitAccount for Account {
    fn rate_limit(&self) -> Option<RateLimitSettings> {
        self.inner.rate_limit
    }

    fn amount_per_minute_limit(&self) -> Option<u64> {
        self.inner.amount_per_minute_limit
    }
}

impl DedupAccount for Account {
    fn dedup_window(&self) -> Option<Duration> {
        self.inner.dedup_window
    }
}

/// Builds an [`Account`] with sensible defaults: a peer with no limits, no
/// settlement threshold, and wide balance bounds.
pub struct AccountBuilder {
    inner: AccountInner,
}

impl AccountBuilder {
    pub fn new(id: AccountId, ilp_address: Address) -> Self {
        AccountBuilder {
            inner: AccountInner {
                id,
                ilp_address,
                asset_code: "XRP".to_string(),
                asset_scale: 9,
                relation: RoutingRelation::Peer,
                routing_weight: RoutingRelation::Peer.default_weight(),
                max_packet_amount: u64::max_value(),
                balance: BalanceSettings {
                    minimum: i64::min_value(),
                    maximum: i64::max_value(),
                    settle_threshold: None,
                    settle_to: 0,
                },
                rate_limit: None,
                amount_per_minute_limit: None,
                dedup_window: None,
                settle_on_connect: false,
            },
        }
    }

    pub fn asset(mut self, code: &str, scale: u8) -> Self {
        self.inner.asset_code = code.to_string();
        self.inner.asset_scale = scale;
        self
    }

    pub fn relation(mut self, relation: RoutingRelation) -> Self {
        self.inner.relation = relation;
        self.inner.routing_weight = relation.default_weight();
        self
    }

    pub fn routing_weight(mut self, weight: u32) -> Self {
        self.inner.routing_weight = weight;
        self
    }

    pub fn max_packet_amount(mut self, max_packet_amount: u64) -> Self {
        self.inner.max_packet_amount = max_packet_amount;
        self
    }

    pub fn balance(mut self, balance: BalanceSettings) -> Self {
        self.inner.balance = balance;
        self
    }

    pub fn rate_limit(mut self, settings: RateLimitSettings) -> Self {
        self.inner.rate_limit = Some(settings);
        self
    }

    pub fn amount_per_minute_limit(mut self, limit: u64) -> Self {
        self.inner.amount_per_minute_limit = Some(limit);
        self
    }

    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.inner.dedup_window = Some(window);
        self
    }

    pub fn settle_on_connect(mut self, settle_on_connect: bool) -> Self {
        self.inner.settle_on_connect = settle_on_connect;
        self
    }

    pub fn build(self) -> Account {
        Account {
            inner: Arc::new(self.inner),
        }
    }
}
