use std::collections::HashMap;
use std::convert::TryFrom;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use junction_packet::Address;
use junction_service::{AccountId, RoutingRelation};
use junction_service_util::RateLimitSettings;
use junction_settlement::BalanceSettings;
use junction_store::{Account, AccountBuilder};

use crate::node::NodeError;

fn default_min_message_window_ms() -> u64 {
    1_000
}

fn default_route_broadcast_interval_ms() -> u64 {
    30_000
}

fn default_route_expiry_interval_ms() -> u64 {
    45_000
}

fn default_hold_down_time_ms() -> u64 {
    45_000
}

/// Node configuration, deserialized from the config file (and/or stdin).
#[derive(Clone, Debug, Deserialize)]
pub struct NodeConfig {
    /// ILP address of this node.
    pub ilp_address: String,
    /// How much each hop shortens a packet's expiry, in milliseconds.
    #[serde(default = "default_min_message_window_ms")]
    pub min_message_window_ms: u64,
    /// Interval between CCP broadcasts to each subscribed peer.
    #[serde(default = "default_route_broadcast_interval_ms")]
    pub route_broadcast_interval_ms: u64,
    /// Remote routes unrefreshed for this long are withdrawn.
    #[serde(default = "default_route_expiry_interval_ms")]
    pub route_expiry_interval_ms: u64,
    /// How long a withdrawn prefix stays unreachable to damp route flap.
    #[serde(default = "default_hold_down_time_ms")]
    pub hold_down_time_ms: u64,
    /// Whether packets may be forwarded back out the account they came from.
    #[serde(default)]
    pub reflect_payments: bool,
    /// Fraction kept on every currency conversion.
    #[serde(default)]
    pub exchange_rate_spread: f64,
    /// Static exchange rates (asset code to base-relative rate), loaded at
    /// boot. Operators can swap these at runtime through the store handle.
    #[serde(default)]
    pub exchange_rates: HashMap<String, f64>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl NodeConfig {
    pub(crate) fn parsed_ilp_address(&self) -> Result<Address, NodeError> {
        Address::from_str(&self.ilp_address)
            .map_err(|err| NodeError::InvalidConfig(format!("ilp_address: {}", err)))
    }

    pub(crate) fn min_message_window(&self) -> Duration {
        Duration::from_millis(self.min_message_window_ms)
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct BalanceConfig {
    pub minimum: i64,
    pub maximum: i64,
    #[serde(default)]
    pub settle_threshold: Option<i64>,
    #[serde(default)]
    pub settle_to: i64,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct RateLimitConfig {
    pub refill_period_ms: u64,
    pub refill_count: u32,
    pub capacity: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AccountConfig {
    pub account_id: String,
    pub ilp_address: String,
    pub relation: RoutingRelation,
    pub asset_code: String,
    pub asset_scale: u8,
    pub balance: BalanceConfig,
    #[serde(default)]
    pub routing_weight: Option<u32>,
    #[serde(default)]
    pub max_packet_amount: Option<u64>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub amount_per_minute_limit: Option<u64>,
    #[serde(default)]
    pub dedup_window_ms: Option<u64>,
    #[serde(default)]
    pub settle_on_connect: bool,
}

impl TryFrom<&AccountConfig> for Account {
    type Error = NodeError;

    fn try_from(config: &AccountConfig) -> Result<Account, NodeError> {
        let account_id = AccountId::from_str(&config.account_id).map_err(|err| {
            NodeError::InvalidConfig(format!("account_id {}: {}", config.account_id, err))
        })?;
        let ilp_address = Address::from_str(&config.ilp_address).map_err(|err| {
            NodeError::InvalidConfig(format!(
                "ilp_address for account {}: {}",
                config.account_id, err
            ))
        })?;

        let mut builder = AccountBuilder::new(account_id, ilp_address)
            .asset(&config.asset_code, config.asset_scale)
            .relation(config.relation)
            .balance(BalanceSettings {
                minimum: config.balance.minimum,
                maximum: config.balance.maximum,
                settle_threshold: config.balance.settle_threshold,
                settle_to: config.balance.settle_to,
            })
            .settle_on_connect(config.settle_on_connect);
        if let Some(weight) = config.routing_weight {
            builder = builder.routing_weight(weight);
        }
        if let Some(max_packet_amount) = config.max_packet_amount {
            builder = builder.max_packet_amount(max_packet_amount);
        }
        if let Some(rate_limit) = config.rate_limit {
            builder = builder.rate_limit(RateLimitSettings {
                refill_period: Duration::from_millis(rate_limit.refill_period_ms),
                refill_count: rate_limit.refill_count,
                capacity: rate_limit.capacity,
            });
        }
        if let Some(limit) = config.amount_per_minute_limit {
            builder = builder.amount_per_minute_limit(limit);
        }
        if let Some(window_ms) = config.dedup_window_ms {
            builder = builder.dedup_window(Duration::from_millis(window_ms));
        }
        Ok(builder.build())
    }
}
