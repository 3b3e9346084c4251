use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::warn;
use parking_lot::Mutex;

use junction_packet::{ErrorCode, RejectBuilder};
use junction_service::{
    Account, AccountId, AddressStore, IlpResult, IncomingRequest, IncomingService,
};

/// Token-bucket parameters for an account's packet rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimitSettings {
    /// How often `refill_count` tokens are added.
    pub refill_period: Duration,
    pub refill_count: u32,
    /// Bucket size; also the initial burst allowance.
    pub capacity: u32,
}

/// Extension trait exposing an account's rate limits.
pub trait RateLimitAccount: Account {
    /// Packet-count limiting; `None` disables it.
    fn rate_limit(&self) -> Option<RateLimitSettings> {
        None
    }

    /// Bandwidth cap in asset units per minute; `None` disables it.
    fn amount_per_minute_limit(&self) -> Option<u64> {
        None
    }
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64) -> Self {
        TokenBucket {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, per_second: f64, capacity: f64, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_second).min(capacity);
        self.last_refill = now;
    }

    fn take(&mut self, tokens: f64) -> bool {
        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    fn put_back(&mut self, tokens: f64, capacity: f64) {
        self.tokens = (self.tokens + tokens).min(capacity);
    }
}

/// Rejects packets from accounts that exceed their configured packet rate
/// (T05) or throughput (T04). Throughput spent on a packet that ends up
/// rejected is refunded.
#[derive(Clone)]
pub struct RateLimitService<S, I> {
    store: S,
    next: I,
    packet_buckets: Arc<Mutex<HashMap<AccountId, TokenBucket>>>,
    throughput_buckets: Arc<Mutex<HashMap<AccountId, TokenBucket>>>,
}

impl<S, I> RateLimitService<S, I> {
    pub fn new(store: S, next: I) -> Self {
        RateLimitService {
            store,
            next,
            packet_buckets: Arc::new(Mutex::new(HashMap::new())),
            throughput_buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<S, I> RateLimitService<S, I> {
    fn take_packet(&self, account_id: &AccountId, settings: RateLimitSettings) -> bool {
        let capacity = settings.capacity as f64;
        let per_second =
            settings.refill_count as f64 / settings.refill_period.as_secs_f64().max(f64::MIN_POSITIVE);
        let mut buckets = self.packet_buckets.lock();
        let bucket = buckets
            .entry(account_id.clone())
            .or_insert_with(|| TokenBucket::full(capacity));
        bucket.refill(per_second, capacity, Instant::now());
        bucket.take(1.0)
    }

    fn take_throughput(&self, account_id: &AccountId, limit: u64, amount: u64) -> bool {
        let capacity = limit as f64;
        let per_second = capacity / 60.0;
        let mut buckets = self.throughput_buckets.lock();
        let bucket = buckets
            .entry(account_id.clone())
            .or_insert_with(|| TokenBucket::full(capacity));
        bucket.refill(per_second, capacity, Instant::now());
        bucket.take(amount as f64)
    }

    fn refund_throughput(&self, account_id: &AccountId, limit: u64, amount: u64) {
        let mut buckets = self.throughput_buckets.lock();
        if let Some(bucket) = buckets.get_mut(account_id) {
            bucket.put_back(amount as f64, limit as f64);
        }
    }
}

#[async_trait]
impl<S, I, A> IncomingService<A> for RateLimitService<S, I>
where
    S: AddressStore + Send + Sync,
    I: IncomingService<A> + Send + Sync,
    A: RateLimitAccount,
{
    async fn handle_request(&mut self, request: IncomingRequest<A>) -> IlpResult {
        let account = request.from.clone();
        let account_id = account.id();
        let amount = request.prepare.amount();

        if let Some(settings) = account.rate_limit() {
            if !self.take_packet(&account_id, settings) {
                warn!(
                    "Account {} was rate limited for sending too many packets",
                    account_id
                );
                return Err(RejectBuilder {
                    code: ErrorCode::T05_RATE_LIMITED,
                    message: &[],
                    triggered_by: Some(&self.store.get_ilp_address()),
                    data: &[],
                }
                .build());
            }
        }

        let throughput_limit = account.amount_per_minute_limit();
        if let Some(limit) = throughput_limit {
            if amount > 0 && !self.take_throughput(&account_id, limit, amount) {
                warn!(
                    "Account {} was throughput limited (limit: {} per minute)",
                    account_id, limit
                );
                return Err(RejectBuilder {
                    code: ErrorCode::T04_INSUFFICIENT_LIQUIDITY,
                    message: &[],
                    triggered_by: Some(&self.store.get_ilp_address()),
                    data: &[],
                }
                .build());
            }
        }

        match self.next.handle_request(request).await {
            Ok(fulfill) => Ok(fulfill),
            Err(reject) => {
                // The packet did not deliver; give the throughput back.
                if let Some(limit) = throughput_limit {
                    if amount > 0 {
                        self.refund_throughput(&account_id, limit, amount);
                    }
                }
                Err(reject)
            }
        }
    }
}
