use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;

use junction_service::{
    Account, AccountId, IlpResult, OutgoingRequest, OutgoingService,
};

/// Extension trait exposing an account's deduplication window.
pub trait DedupAccount: Account {
    /// How long an identical retry returns the cached response; `None`
    /// disables deduplication.
    fn dedup_window(&self) -> Option<Duration> {
        None
    }
}

// A packet is "the same packet" when all the end-to-end fields match.
#[derive(Clone, PartialEq, Eq, Hash)]
struct PacketKey {
    destination: String,
    amount: u64,
    expires_at: SystemTime,
    execution_condition: [u8; 32],
}

impl PacketKey {
    fn of(prepare: &junction_packet::Prepare) -> Self {
        let mut execution_condition = [0u8; 32];
        execution_condition.copy_from_slice(prepare.execution_condition());
        PacketKey {
            destination: prepare.destination().to_string(),
            amount: prepare.amount(),
            expires_at: prepare.expires_at(),
            execution_condition,
        }
    }
}

struct CachedResponse {
    result: IlpResult,
    cached_at: Instant,
}

/// Returns the cached response for a Prepare identical to one recently
/// forwarded to the same account, instead of sending it downstream again.
/// Catches both sender retries and packets circling back through a routing
/// loop.
#[derive(Clone)]
pub struct DedupService<O> {
    next: O,
    caches: Arc<Mutex<HashMap<AccountId, HashMap<PacketKey, CachedResponse>>>>,
}

impl<O> DedupService<O> {
    pub fn new(next: O) -> Self {
        DedupService {
            next,
            caches: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn cached(&self, account_id: &AccountId, key: &PacketKey, window: Duration) -> Option<IlpResult> {
        let now = Instant::now();
        let mut caches = self.caches.lock();
        let cache = caches.get_mut(account_id)?;
        cache.retain(|_, cached| now.duration_since(cached.cached_at) < window);
        cache.get(key).map(|cached| cached.result.clone())
    }

    fn store(&self, account_id: AccountId, key: PacketKey, result: IlpResult) {
        let mut caches = self.caches.lock();
        caches.entry(account_id).or_default().insert(
            key,
            CachedResponse {
                result,
                cached_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl<O, A> OutgoingService<A> for DedupService<O>
where
    O: OutgoingService<A> + Send + Sync,
    A: DedupAccount,
{
    async fn send_request(&mut self, request: OutgoingRequest<A>) -> IlpResult {
        let window = match request.to.dedup_window() {
            Some(window) => window,
            None => return self.next.send_request(request).await,
        };

        let account_id = request.to.id();
        let key = PacketKey::of(&request.prepare);
        if let Some(result) = self.cached(&account_id, &key, window) {
            debug!(
                "Returning cached response for duplicate packet to account {}",
                account_id
            );
            return result;
        }

        let result = self.next.send_request(request).await;
        self.store(account_id, key, result.clone());
        result
    }
}
