use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::debug;

use junction_packet::{ErrorCode, RejectBuilder};
use junction_service::{
    Account, AddressStore, IlpResult, OutgoingRequest, OutgoingService,
};

pub const DEFAULT_MIN_MESSAGE_WINDOW: Duration = Duration::from_secs(1);

/// Shortens each outgoing Prepare's expiry by the node's message window so
/// there is time to relay the fulfillment back upstream before the incoming
/// packet expires. A packet whose shortened expiry has already passed is
/// rejected with R02 before anything is sent.
#[derive(Clone)]
pub struct ExpiryShortenerService<O, S> {
    store: S,
    next: O,
    min_message_window: Duration,
}

impl<O, S> ExpiryShortenerService<O, S> {
    pub fn new(store: S, next: O) -> Self {
        ExpiryShortenerService {
            store,
            next,
            min_message_window: DEFAULT_MIN_MESSAGE_WINDOW,
        }
    }

    pub fn with_min_message_window(mut self, min_message_window: Duration) -> Self {
        self.min_message_window = min_message_window;
        self
    }
}

#[async_trait]
impl<O, S, A> OutgoingService<A> for ExpiryShortenerService<O, S>
where
    O: OutgoingService<A> + Send + Sync,
    S: AddressStore + Send + Sync,
    A: Account,
{
    async fn send_request(&mut self, mut request: OutgoingRequest<A>) -> IlpResult {
        let outgoing_expiry = request.prepare.expires_at() - self.min_message_window;
        if outgoing_expiry <= SystemTime::now() {
            debug!(
                "Rejecting packet to account {} with insufficient timeout left for this hop",
                request.to.id()
            );
            return Err(RejectBuilder {
                code: ErrorCode::R02_INSUFFICIENT_TIMEOUT,
                message: b"insufficient timeout",
                triggered_by: Some(&self.store.get_ilp_address()),
                data: &[],
            }
            .build());
        }
        request.prepare.set_expires_at(outgoing_expiry);
        self.next.send_request(request).await
    }
}
