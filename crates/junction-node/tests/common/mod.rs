//! Shared harness for the end-to-end tests: in-process peers speaking the
//! link protocol against a running node.
#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;

use junction_link::{link_pair, IgnoreMoney, LinkService};
use junction_node::{NodeConfig, NodeHandle};
use junction_packet::{
    Address, FulfillBuilder, Prepare, PrepareBuilder, RejectBuilder,
};
use junction_service::{
    incoming_service_fn, AccountId, IlpResult, IncomingRequest, IncomingService,
    OutgoingRequest, OutgoingService,
};
use junction_settlement::{
    Invoice, SettlementEngine, SettlementError, SettlementMessage,
};
use junction_store::{Account, AccountBuilder};

/// SHA-256 of 32 zero bytes: the condition fulfilled by `[0u8; 32]`.
pub const ZERO_HASH: [u8; 32] = [
    102, 104, 122, 173, 248, 98, 189, 119, 108, 143, 193, 139, 142, 159, 142, 32, 8, 151, 20, 133,
    110, 226, 51, 179, 144, 42, 89, 29, 13, 95, 41, 37,
];

pub fn config_from_json(json: serde_json::Value) -> NodeConfig {
    serde_json::from_value(json).expect("test configuration is valid")
}

pub fn account_id(id: &str) -> AccountId {
    AccountId::from_str(id).unwrap()
}

pub fn prepare_to(destination: &str, amount: u64, expires_in: Duration) -> Prepare {
    PrepareBuilder {
        destination: Address::from_str(destination).unwrap(),
        amount,
        expires_at: SystemTime::now() + expires_in,
        execution_condition: &ZERO_HASH,
        data: b"",
    }
    .build()
}

/// One side of a peer relationship with the node under test.
pub struct Harness {
    links: LinkService<Account>,
    node_account: Account,
}

impl Harness {
    /// Connects to `handle` as `account_id`, answering incoming packets with
    /// `incoming`.
    pub async fn connect<I>(handle: &NodeHandle, account_id: &AccountId, incoming: I) -> Harness
    where
        I: IncomingService<Account> + Clone + Send + Sync + 'static,
    {
        let links: LinkService<Account> = LinkService::new(
            handle
                .ilp_address()
                .with_suffix("harness")
                .expect("harness address is valid"),
        );
        let node_account = AccountBuilder::new(
            AccountId::from_str("node").unwrap(),
            handle.ilp_address().clone(),
        )
        .build();

        let (node_side, harness_side) = link_pair();
        handle
            .attach_link(account_id, node_side)
            .await
            .expect("account exists");
        links.attach(node_account.clone(), harness_side, incoming, IgnoreMoney);

        Harness {
            links,
            node_account,
        }
    }

    /// Sends a Prepare into the node and awaits the response.
    pub async fn send(&self, prepare: Prepare) -> IlpResult {
        let mut links = self.links.clone();
        links
            .send_request(OutgoingRequest {
                from: self.node_account.clone(),
                to: self.node_account.clone(),
                original_amount: prepare.amount(),
                prepare,
            })
            .await
    }
}

/// Incoming service that records the prepares it sees and fulfills each with
/// the zero preimage.
pub fn recording_fulfiller(
    received: Arc<Mutex<Vec<Prepare>>>,
) -> impl IncomingService<Account> + Clone + Send + Sync + 'static {
    incoming_service_fn(move |request: IncomingRequest<Account>| {
        received.lock().push(request.prepare);
        Ok(FulfillBuilder {
            fulfillment: &[0; 32],
            data: b"",
        }
        .build())
    })
}

pub fn reject_all() -> impl IncomingService<Account> + Clone + Send + Sync + 'static {
    incoming_service_fn(|_request: IncomingRequest<Account>| {
        Err(RejectBuilder {
            code: junction_packet::ErrorCode::F02_UNREACHABLE,
            message: b"harness has no handler",
            triggered_by: None,
            data: &[],
        }
        .build())
    })
}

/// Incoming service for a settling peer: answers `peer.settle` peering and
/// invoice messages under the given engine identity, and fulfills data
/// packets with the zero preimage.
pub fn settling_peer(
    engine_identity: &'static str,
    received: Arc<Mutex<Vec<Prepare>>>,
) -> impl IncomingService<Account> + Clone + Send + Sync + 'static {
    incoming_service_fn(move |request: IncomingRequest<Account>| {
        if request.prepare.destination().as_str() == "peer.settle" {
            let message: SettlementMessage =
                serde_json::from_slice(request.prepare.data()).expect("valid settlement message");
            let response = match message {
                SettlementMessage::PeeringRequest { .. } => SettlementMessage::PeeringResponse {
                    engine_identity: engine_identity.to_string(),
                    engine_endpoint: None,
                },
                SettlementMessage::InvoiceRequest { amount } => {
                    SettlementMessage::InvoiceResponse {
                        invoice: Invoice {
                            artifact: format!("inv-{}-{}", engine_identity, amount),
                            destination: engine_identity.to_string(),
                        },
                    }
                }
                other => panic!("unexpected settlement message: {:?}", other),
            };
            return Ok(response.to_fulfill());
        }
        received.lock().push(request.prepare);
        Ok(FulfillBuilder {
            fulfillment: &[0; 32],
            data: b"",
        }
        .build())
    })
}

/// Scripted settlement engine recording the payments it makes.
pub struct ScriptedEngine {
    pub identity: String,
    pub payments: Mutex<Vec<(String, u64)>>,
}

impl ScriptedEngine {
    pub fn new(identity: &str) -> Self {
        ScriptedEngine {
            identity: identity.to_string(),
            payments: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SettlementEngine for ScriptedEngine {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    async fn create_invoice(&self, amount: u64) -> Result<Invoice, SettlementError> {
        Ok(Invoice {
            artifact: format!("inv-{}-{}", self.identity, amount),
            destination: self.identity.clone(),
        })
    }

    async fn pay(&self, invoice: &Invoice, amount: u64) -> Result<(), SettlementError> {
        self.payments.lock().push((invoice.artifact.clone(), amount));
        Ok(())
    }
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn wait_until<F>(description: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", description);
}

pub fn balance_of(handle: &NodeHandle, id: &str) -> i64 {
    use junction_settlement::BalanceStore;
    handle
        .store()
        .balance_tracker(&account_id(id))
        .expect("account has a tracker")
        .balance()
}
