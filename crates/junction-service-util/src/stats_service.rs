use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use junction_service::{
    Account, IlpResult, IncomingRequest, IncomingService, OutgoingRequest, OutgoingService,
};

/// Process-wide packet counters, shared by every `StatsService` in the node.
#[derive(Clone, Default)]
pub struct NodeStats {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    incoming_prepares: AtomicU64,
    incoming_fulfills: AtomicU64,
    incoming_rejects: AtomicU64,
    outgoing_prepares: AtomicU64,
    outgoing_fulfills: AtomicU64,
    outgoing_rejects: AtomicU64,
}

impl NodeStats {
    pub fn new() -> Self {
        NodeStats::default()
    }

    pub fn incoming_prepares(&self) -> u64 {
        self.inner.incoming_prepares.load(Ordering::Relaxed)
    }

    pub fn incoming_fulfills(&self) -> u64 {
        self.inner.incoming_fulfills.load(Ordering::Relaxed)
    }

    pub fn incoming_rejects(&self) -> u64 {
        self.inner.incoming_rejects.load(Ordering::Relaxed)
    }

    pub fn outgoing_prepares(&self) -> u64 {
        self.inner.outgoing_prepares.load(Ordering::Relaxed)
    }

    pub fn outgoing_fulfills(&self) -> u64 {
        self.inner.outgoing_fulfills.load(Ordering::Relaxed)
    }

    pub fn outgoing_rejects(&self) -> u64 {
        self.inner.outgoing_rejects.load(Ordering::Relaxed)
    }
}

/// Observability only: counts packets and outcomes on whichever chain it is
/// inserted into, then forwards untouched.
#[derive(Clone)]
pub struct StatsService<IO> {
    stats: NodeStats,
    next: IO,
}

impl<IO> StatsService<IO> {
    pub fn new(stats: NodeStats, next: IO) -> Self {
        StatsService { stats, next }
    }
}

#[async_trait]
impl<I, A> IncomingService<A> for StatsService<I>
where
    I: IncomingService<A> + Send + Sync,
    A: Account,
{
    async fn handle_request(&mut self, request: IncomingRequest<A>) -> IlpResult {
        self.stats
            .inner
            .incoming_prepares
            .fetch_add(1, Ordering::Relaxed);
        let result = self.next.handle_request(request).await;
        match &result {
            Ok(_) => &self.stats.inner.incoming_fulfills,
            Err(_) => &self.stats.inner.incoming_rejects,
        }
        .fetch_add(1, Ordering::Relaxed);
        result
    }
}

#[async_trait]
impl<O, A> OutgoingService<A> for StatsService<O>
where
    O: OutgoingService<A> + Send + Sync,
    A: Account,
{
    async fn send_request(&mut self, request: OutgoingRequest<A>) -> IlpResult {
        self.stats
            .inner
            .outgoing_prepares
            .fetch_add(1, Ordering::Relaxed);
        let result = self.next.send_request(request).await;
        match &result {
            Ok(_) => &self.stats.inner.outgoing_fulfills,
            Err(_) => &self.stats.inner.outgoing_rejects,
        }
        .fetch_add(1, Ordering::Relaxed);
        result
    }
}
