//! # junction-service-util
//!
//! The middleware services composed around the router: expiry validation and
//! hop timeouts, fulfillment verification, per-account rate limiting,
//! max-packet enforcement, retry deduplication, exchange-rate application,
//! and stats counters.

mod dedup_service;
mod exchange_rates_service;
mod expiry_shortener_service;
mod max_packet_amount_service;
mod rate_limit_service;
mod stats_service;
mod validator_service;

pub use self::dedup_service::{DedupAccount, DedupService};
pub use self::exchange_rates_service::{
    Convert, ConvertDetails, ExchangeRateService, ExchangeRateStore, ExchangeRateStoreError,
};
pub use self::expiry_shortener_service::ExpiryShortenerService;
pub use self::max_packet_amount_service::{MaxPacketAmountAccount, MaxPacketAmountService};
pub use self::rate_limit_service::{RateLimitAccount, RateLimitService, RateLimitSettings};
pub use self::stats_service::{NodeStats, StatsService};
pub use self::validator_service::ValidatorService;
