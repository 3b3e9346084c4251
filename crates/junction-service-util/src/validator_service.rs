use std::marker::PhantomData;
use std::time::SystemTime;

use async_trait::async_trait;
use log::error;
use ring::digest::{digest, SHA256};

use junction_packet::{ErrorCode, RejectBuilder};
use junction_service::{
    Account, AddressStore, IlpResult, IncomingRequest, IncomingService, OutgoingRequest,
    OutgoingService,
};

/// Rejects timed-out requests and checks that fulfillments match the
/// `execution_condition` of the Prepare they answer.
///
/// As an incoming service it drops already-expired prepares; as an outgoing
/// service it enforces the hop deadline around the downstream send and
/// verifies the preimage on the way back.
#[derive(Clone)]
pub struct ValidatorService<IO, S, A> {
    store: S,
    next: IO,
    account_type: PhantomData<A>,
}

impl<I, S, A> ValidatorService<I, S, A>
where
    I: IncomingService<A>,
    S: AddressStore,
    A: Account,
{
    pub fn incoming(store: S, next: I) -> Self {
        ValidatorService {
            store,
            next,
            account_type: PhantomData,
        }
    }
}

impl<O, S, A> ValidatorService<O, S, A>
where
    O: OutgoingService<A>,
    S: AddressStore,
    A: Account,
{
    pub fn outgoing(store: S, next: O) -> Self {
        ValidatorService {
            store,
            next,
            account_type: PhantomData,
        }
    }
}

#[async_trait]
impl<I, S, A> IncomingService<A> for ValidatorService<I, S, A>
where
    I: IncomingService<A> + Send + Sync,
    S: AddressStore + Send + Sync,
    A: Account,
{
    async fn handle_request(&mut self, request: IncomingRequest<A>) -> IlpResult {
        let expires_at = request.prepare.expires_at();
        let now = SystemTime::now();
        if expires_at >= now {
            self.next.handle_request(request).await
        } else {
            error!(
                "Incoming packet from account {} expired {:?} ago",
                request.from.id(),
                now.duration_since(expires_at).unwrap_or_default(),
            );
            Err(RejectBuilder {
                code: ErrorCode::R00_TRANSFER_TIMED_OUT,
                message: &[],
                triggered_by: Some(&self.store.get_ilp_address()),
                data: &[],
            }
            .build())
        }
    }
}

#[async_trait]
impl<O, S, A> OutgoingService<A> for ValidatorService<O, S, A>
where
    O: OutgoingService<A> + Send + Sync,
    S: AddressStore + Send + Sync,
    A: Account,
{
    async fn send_request(&mut self, request: OutgoingRequest<A>) -> IlpResult {
        let mut condition = [0u8; 32];
        condition.copy_from_slice(request.prepare.execution_condition());

        let expires_at = request.prepare.expires_at();
        let now = SystemTime::now();
        let ilp_address = self.store.get_ilp_address();
        let time_left = match expires_at.duration_since(now) {
            Ok(time_left) => time_left,
            Err(_) => {
                error!(
                    "Not forwarding packet to account {} that expired {:?} ago",
                    request.to.id(),
                    now.duration_since(expires_at).unwrap_or_default(),
                );
                return Err(RejectBuilder {
                    code: ErrorCode::R00_TRANSFER_TIMED_OUT,
                    message: &[],
                    triggered_by: Some(&ilp_address),
                    data: &[],
                }
                .build());
            }
        };

        let to = request.to.id();
        let fulfill = match tokio::time::timeout(time_left, self.next.send_request(request)).await {
            Ok(result) => result?,
            Err(_elapsed) => {
                error!(
                    "Outgoing request to account {} timed out after {:?}",
                    to, time_left
                );
                return Err(RejectBuilder {
                    code: ErrorCode::R00_TRANSFER_TIMED_OUT,
                    message: &[],
                    triggered_by: Some(&ilp_address),
                    data: &[],
                }
                .build());
            }
        };

        let generated_condition = digest(&SHA256, fulfill.fulfillment());
        if generated_condition.as_ref() == condition {
            Ok(fulfill)
        } else {
            error!(
                "Fulfillment from account {} did not match condition. Fulfillment: {}, condition: {}",
                to,
                hex_of(fulfill.fulfillment()),
                hex_of(&condition),
            );
            Err(RejectBuilder {
                code: ErrorCode::F05_WRONG_CONDITION,
                message: b"fulfillment did not match condition",
                triggered_by: Some(&ilp_address),
                data: &[],
            }
            .build())
        }
    }
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}
