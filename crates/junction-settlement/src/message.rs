use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::{debug, error, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use junction_packet::{Address, ErrorCode, FulfillBuilder, RejectBuilder};
use junction_service::{
    Account, AddressStore, IlpResult, IncomingRequest, IncomingService,
};

use crate::balance::BalanceStore;
use crate::engine::{EngineRegistry, Invoice};

/// Link-local address settlement messages are sent to.
pub static SETTLEMENT_ADDRESS: Lazy<Address> = Lazy::new(|| Address::new("peer.settle"));

/// Peer-protocol messages fulfill with 32 zero bytes; the condition is its
/// SHA-256 so the responses pass fulfillment validation.
pub const PEER_PROTOCOL_FULFILLMENT: [u8; 32] = [0; 32];
pub const PEER_PROTOCOL_CONDITION: [u8; 32] = [
    102, 104, 122, 173, 248, 98, 189, 119, 108, 143, 193, 139, 142, 159, 142, 32, 8, 151, 20, 133,
    110, 226, 51, 179, 144, 42, 89, 29, 13, 95, 41, 37,
];

const MESSAGE_EXPIRY: Duration = Duration::from_secs(30);

/// The settlement sub-protocol riding on `peer.settle` prepares as JSON.
///
/// Requests arrive as Prepare data; responses come back as Fulfill data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettlementMessage {
    /// Exchanged at connect time so both sides know who they settle with.
    PeeringRequest {
        engine_identity: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        engine_endpoint: Option<String>,
    },
    PeeringResponse {
        engine_identity: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        engine_endpoint: Option<String>,
    },
    /// Ask the peer for an artifact we can pay `amount` into.
    InvoiceRequest { amount: u64 },
    InvoiceResponse { invoice: Invoice },
}

impl SettlementMessage {
    pub fn to_prepare(&self) -> junction_packet::Prepare {
        junction_packet::PrepareBuilder {
            destination: SETTLEMENT_ADDRESS.clone(),
            amount: 0,
            expires_at: SystemTime::now() + MESSAGE_EXPIRY,
            execution_condition: &PEER_PROTOCOL_CONDITION,
            data: &serde_json::to_vec(self).expect("settlement messages always serialize"),
        }
        .build()
    }

    pub fn to_fulfill(&self) -> junction_packet::Fulfill {
        FulfillBuilder {
            fulfillment: &PEER_PROTOCOL_FULFILLMENT,
            data: &serde_json::to_vec(self).expect("settlement messages always serialize"),
        }
        .build()
    }
}

/// Answers `peer.settle` messages from peers; passes everything else on.
#[derive(Clone)]
pub struct SettlementMessageService<I, S> {
    store: S,
    engines: EngineRegistry,
    next: I,
}

impl<I, S> SettlementMessageService<I, S> {
    pub fn new(store: S, engines: EngineRegistry, next: I) -> Self {
        SettlementMessageService {
            store,
            engines,
            next,
        }
    }
}

#[async_trait]
impl<I, S, A> IncomingService<A> for SettlementMessageService<I, S>
where
    I: IncomingService<A> + Send + Sync,
    S: AddressStore + BalanceStore,
    A: Account,
{
    async fn handle_request(&mut self, request: IncomingRequest<A>) -> IlpResult {
        if request.prepare.destination() != *SETTLEMENT_ADDRESS {
            return self.next.handle_request(request).await;
        }

        let ilp_address = self.store.get_ilp_address();
        let from = request.from.clone();

        let message: SettlementMessage = match serde_json::from_slice(request.prepare.data()) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    "Invalid settlement message from account {}: {}",
                    from.id(),
                    err
                );
                return Err(RejectBuilder {
                    code: ErrorCode::F00_BAD_REQUEST,
                    message: b"invalid settlement message",
                    triggered_by: Some(&ilp_address),
                    data: &[],
                }
                .build());
            }
        };

        let engine = match self.engines.get(&from.id()) {
            Some(engine) => engine,
            None => {
                debug!(
                    "Got settlement message from account {} with no settlement engine configured",
                    from.id()
                );
                return Err(RejectBuilder {
                    code: ErrorCode::F00_BAD_REQUEST,
                    message: b"no settlement engine configured for this account",
                    triggered_by: Some(&ilp_address),
                    data: &[],
                }
                .build());
            }
        };

        match message {
            SettlementMessage::PeeringRequest {
                engine_identity, ..
            } => {
                if let Some(tracker) = self.store.balance_tracker(&from.id()) {
                    tracker.set_remote_engine_identity(engine_identity);
                }
                Ok(SettlementMessage::PeeringResponse {
                    engine_identity: engine.identity(),
                    engine_endpoint: None,
                }
                .to_fulfill())
            }
            SettlementMessage::InvoiceRequest { amount } => {
                match engine.create_invoice(amount).await {
                    Ok(invoice) => {
                        if let Some(tracker) = self.store.balance_tracker(&from.id()) {
                            tracker.record_issued_invoice(invoice.artifact.clone());
                        }
                        debug!(
                            "Issued invoice for {} to account {}",
                            amount,
                            from.id()
                        );
                        Ok(SettlementMessage::InvoiceResponse { invoice }.to_fulfill())
                    }
                    Err(err) => {
                        error!(
                            "Settlement engine could not issue an invoice for account {}: {}",
                            from.id(),
                            err
                        );
                        Err(RejectBuilder {
                            code: ErrorCode::T00_INTERNAL_ERROR,
                            message: b"could not issue invoice",
                            triggered_by: Some(&ilp_address),
                            data: &[],
                        }
                        .build())
                    }
                }
            }
            SettlementMessage::PeeringResponse { .. } | SettlementMessage::InvoiceResponse { .. } => {
                Err(RejectBuilder {
                    code: ErrorCode::F00_BAD_REQUEST,
                    message: b"unexpected settlement response",
                    triggered_by: Some(&ilp_address),
                    data: &[],
                }
                .build())
            }
        }
    }
}
