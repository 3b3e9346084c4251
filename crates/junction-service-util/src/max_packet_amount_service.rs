use async_trait::async_trait;
use log::debug;

use junction_packet::{ErrorCode, MaxPacketAmountDetails, RejectBuilder};
use junction_service::{
    Account, AddressStore, IlpResult, IncomingRequest, IncomingService,
};

/// Extension trait exposing the largest packet an account will forward.
pub trait MaxPacketAmountAccount: Account {
    fn max_packet_amount(&self) -> u64;
}

/// Caps the value of individual packets per the ingress account's
/// configuration. The F08 reject data carries the received and maximum
/// amounts so senders can size their packets down.
#[derive(Clone)]
pub struct MaxPacketAmountService<I, S> {
    store: S,
    next: I,
}

impl<I, S> MaxPacketAmountService<I, S> {
    pub fn new(store: S, next: I) -> Self {
        MaxPacketAmountService { store, next }
    }
}

#[async_trait]
impl<I, S, A> IncomingService<A> for MaxPacketAmountService<I, S>
where
    I: IncomingService<A> + Send + Sync,
    S: AddressStore + Send + Sync,
    A: MaxPacketAmountAccount,
{
    async fn handle_request(&mut self, request: IncomingRequest<A>) -> IlpResult {
        let max_packet_amount = request.from.max_packet_amount();
        if request.prepare.amount() <= max_packet_amount {
            return self.next.handle_request(request).await;
        }
        debug!(
            "Prepare amount {} exceeds max packet amount {} for account {}",
            request.prepare.amount(),
            max_packet_amount,
            request.from.id()
        );
        let details =
            MaxPacketAmountDetails::new(request.prepare.amount(), max_packet_amount).to_bytes();
        Err(RejectBuilder {
            code: ErrorCode::F08_AMOUNT_TOO_LARGE,
            message: &[],
            triggered_by: Some(&self.store.get_ilp_address()),
            data: &details[..],
        }
        .build())
    }
}
