use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::BytesMut;
use log::{debug, error, trace, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};

use junction_packet::{Address, ErrorCode, Packet, RejectBuilder};
use junction_service::{
    Account, AccountId, IlpResult, IncomingRequest, IncomingService, OutgoingRequest,
    OutgoingService,
};

use crate::packet::{Frame, MessageFrame, ProtocolData, ResponseFrame, TransferFrame};
use crate::transport::LinkTransport;

type PendingResponse = oneshot::Sender<IlpResult>;
type PendingTable = Arc<Mutex<HashMap<u32, PendingResponse>>>;

/// Callback for incoming TRANSFER frames (money arriving over the link).
#[async_trait]
pub trait MoneyHandler<A: Account>: Clone + Send + Sync + 'static {
    async fn handle_money(&self, from: A, amount: u64);
}

/// Money handler for accounts without a money capability.
#[derive(Clone)]
pub struct IgnoreMoney;

#[async_trait]
impl<A: Account> MoneyHandler<A> for IgnoreMoney {
    async fn handle_money(&self, from: A, amount: u64) {
        warn!(
            "Dropping incoming transfer of {} from account {} with no money handler",
            amount,
            from.id()
        );
    }
}

struct LinkConnection {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    pending: PendingTable,
}

/// Serves every connected peer link.
///
/// As an `OutgoingService` this is the end of the outgoing chain: a Prepare
/// is framed with a random request id and the call suspends until the
/// matching response frame arrives or the packet's expiry passes. On expiry
/// the pending entry is freed so a late response is discarded.
#[derive(Clone)]
pub struct LinkService<A: Account> {
    ilp_address: Address,
    connections: Arc<RwLock<HashMap<AccountId, Arc<LinkConnection>>>>,
    account_type: std::marker::PhantomData<A>,
}

impl<A: Account> LinkService<A> {
    pub fn new(ilp_address: Address) -> Self {
        LinkService {
            ilp_address,
            connections: Arc::new(RwLock::new(HashMap::new())),
            account_type: std::marker::PhantomData,
        }
    }

    /// Attaches a transport for `account` and spawns its read task.
    ///
    /// `incoming` is the fully composed incoming chain; every Prepare read
    /// off this link is dispatched through it concurrently. `money_handler`
    /// receives TRANSFER amounts.
    pub fn attach<I, M>(&self, account: A, transport: LinkTransport, incoming: I, money_handler: M)
    where
        I: IncomingService<A> + Clone + Send + Sync + 'static,
        M: MoneyHandler<A>,
    {
        let LinkTransport {
            outgoing,
            incoming: mut frames_in,
        } = transport;

        let connection = Arc::new(LinkConnection {
            sender: outgoing.clone(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        });
        self.connections
            .write()
            .insert(account.id(), connection.clone());

        let connections = self.connections.clone();
        let account_id = account.id();
        debug!("Account {} connected", account_id);

        tokio::spawn(async move {
            while let Some(bytes) = frames_in.recv().await {
                let frame = match Frame::from_bytes(&bytes) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("Dropping unparseable frame from {}: {}", account_id, err);
                        continue;
                    }
                };
                handle_frame(
                    frame,
                    &account,
                    &connection,
                    incoming.clone(),
                    &money_handler,
                );
            }
            // Transport closed: drop the connection entry (unless the account
            // was already re-attached) and fail whatever was still awaiting a
            // response.
            debug!("Account {} disconnected", account_id);
            {
                let mut connections = connections.write();
                if let Some(current) = connections.get(&account_id) {
                    if Arc::ptr_eq(current, &connection) {
                        connections.remove(&account_id);
                    }
                }
            }
            connection.pending.lock().clear();
        });
    }

    /// Explicitly removes a link; outstanding requests resolve as failed.
    pub fn detach(&self, account_id: &AccountId) {
        if let Some(connection) = self.connections.write().remove(account_id) {
            connection.pending.lock().clear();
        }
    }

    pub fn is_connected(&self, account_id: &AccountId) -> bool {
        self.connections.read().contains_key(account_id)
    }

    /// Sends money over the link, fire-and-forget.
    pub fn send_money(&self, account_id: &AccountId, amount: u64) -> bool {
        let connection = match self.connections.read().get(account_id) {
            Some(connection) => connection.clone(),
            None => return false,
        };
        let frame = Frame::Transfer(TransferFrame {
            request_id: rand::random(),
            amount,
            protocol_data: Vec::new(),
        });
        connection.sender.send(frame.to_bytes()).is_ok()
    }

    fn peer_unreachable(&self, account_id: &AccountId) -> IlpResult {
        debug!("Account {} has no connected link", account_id);
        Err(RejectBuilder {
            code: ErrorCode::T01_PEER_UNREACHABLE,
            message: b"peer link is not connected",
            triggered_by: Some(&self.ilp_address),
            data: &[],
        }
        .build())
    }
}

fn handle_frame<A, I, M>(
    frame: Frame,
    account: &A,
    connection: &Arc<LinkConnection>,
    mut incoming: I,
    money_handler: &M,
) where
    A: Account,
    I: IncomingService<A> + Send + Sync + 'static,
    M: MoneyHandler<A>,
{
    match frame {
        Frame::Message(message) => {
            let request_id = message.request_id;
            let packet = match parse_ilp_packet(&message.protocol_data, request_id) {
                Some(packet) => packet,
                None => return,
            };
            match packet {
                Packet::Prepare(prepare) => {
                    // Prepares from the same link are handled concurrently;
                    // ordering past this point is not preserved.
                    let account = account.clone();
                    let sender = connection.sender.clone();
                    tokio::spawn(async move {
                        let result = incoming
                            .handle_request(IncomingRequest {
                                from: account,
                                prepare,
                            })
                            .await;
                        let packet = match result {
                            Ok(fulfill) => Packet::Fulfill(fulfill),
                            Err(reject) => Packet::Reject(reject),
                        };
                        let response = Frame::Response(ResponseFrame {
                            request_id,
                            protocol_data: vec![ProtocolData::ilp(
                                BytesMut::from(&packet).to_vec(),
                            )],
                        });
                        if sender.send(response.to_bytes()).is_err() {
                            debug!("Link closed before response {} could be sent", request_id);
                        }
                    });
                }
                // Responses must come back as RESPONSE frames.
                Packet::Fulfill(_) | Packet::Reject(_) => {
                    warn!(
                        "Dropping MESSAGE frame {} carrying a response packet",
                        request_id
                    );
                }
            }
        }
        Frame::Response(response) => {
            let request_id = response.request_id;
            let result = match parse_ilp_packet(&response.protocol_data, request_id) {
                Some(Packet::Fulfill(fulfill)) => Ok(fulfill),
                Some(Packet::Reject(reject)) => Err(reject),
                Some(Packet::Prepare(_)) => {
                    warn!("Dropping RESPONSE frame {} carrying a Prepare", request_id);
                    return;
                }
                None => return,
            };
            resolve_pending(connection, request_id, result);
        }
        Frame::Error(error_frame) => {
            let request_id = error_frame.request_id;
            let code = code_from_frame(&error_frame.code);
            let reject = RejectBuilder {
                code,
                message: error_frame.data.as_bytes(),
                triggered_by: None,
                data: &[],
            }
            .build();
            resolve_pending(connection, request_id, Err(reject));
        }
        Frame::Transfer(transfer) => {
            let account = account.clone();
            let money_handler = money_handler.clone();
            let sender = connection.sender.clone();
            let request_id = transfer.request_id;
            tokio::spawn(async move {
                money_handler.handle_money(account, transfer.amount).await;
                // Acknowledge so the sender's link stays in sync.
                let ack = Frame::Response(ResponseFrame {
                    request_id,
                    protocol_data: Vec::new(),
                });
                let _ = sender.send(ack.to_bytes());
            });
        }
    }
}

fn parse_ilp_packet(protocol_data: &[ProtocolData], request_id: u32) -> Option<Packet> {
    let ilp_data = protocol_data
        .iter()
        .find(|entry| entry.protocol_name == crate::packet::ILP_PROTOCOL_NAME)?;
    match Packet::try_from(BytesMut::from(&ilp_data.data[..])) {
        Ok(packet) => Some(packet),
        Err(err) => {
            warn!("Dropping frame {} with invalid ILP packet: {}", request_id, err);
            None
        }
    }
}

fn resolve_pending(connection: &Arc<LinkConnection>, request_id: u32, result: IlpResult) {
    match connection.pending.lock().remove(&request_id) {
        Some(responder) => {
            if responder.send(result).is_err() {
                // The sender gave up (deadline passed); the entry was already
                // removed so this response is simply dropped.
                trace!("Response {} arrived after the caller went away", request_id);
            }
        }
        None => trace!("Discarding unsolicited response for request {}", request_id),
    }
}

fn code_from_frame(code: &str) -> ErrorCode {
    let mut bytes = [0u8; 3];
    if code.len() == 3 {
        bytes.copy_from_slice(code.as_bytes());
        ErrorCode::new(bytes).unwrap_or(ErrorCode::T00_INTERNAL_ERROR)
    } else {
        ErrorCode::T00_INTERNAL_ERROR
    }
}

#[async_trait]
impl<A: Account> OutgoingService<A> for LinkService<A> {
    async fn send_request(&mut self, request: OutgoingRequest<A>) -> IlpResult {
        let account_id = request.to.id();
        let connection = match self.connections.read().get(&account_id) {
            Some(connection) => connection.clone(),
            None => return self.peer_unreachable(&account_id),
        };

        let request_id: u32 = rand::random();
        let (responder, receiver) = oneshot::channel();
        {
            let mut pending = connection.pending.lock();
            if pending.contains_key(&request_id) {
                // 32-bit randomness makes this all but impossible; reject the
                // new caller rather than clobber the old entry.
                error!("Request id collision on link to {}", account_id);
                return Err(RejectBuilder {
                    code: ErrorCode::T00_INTERNAL_ERROR,
                    message: b"request id collision",
                    triggered_by: Some(&self.ilp_address),
                    data: &[],
                }
                .build());
            }
            pending.insert(request_id, responder);
        }

        let expires_at = request.prepare.expires_at();
        let frame = Frame::Message(MessageFrame {
            request_id,
            protocol_data: vec![ProtocolData::ilp(BytesMut::from(&request.prepare).to_vec())],
        });

        if connection.sender.send(frame.to_bytes()).is_err() {
            connection.pending.lock().remove(&request_id);
            return self.peer_unreachable(&account_id);
        }

        let remaining = match expires_at.duration_since(SystemTime::now()) {
            Ok(remaining) => remaining,
            Err(_) => {
                connection.pending.lock().remove(&request_id);
                return Err(self.request_timed_out(&account_id));
            }
        };

        match tokio::time::timeout(remaining, receiver).await {
            Ok(Ok(result)) => result,
            // The link went away while we were waiting.
            Ok(Err(_closed)) => self.peer_unreachable(&account_id),
            Err(_elapsed) => {
                // Free the entry so a late response is discarded.
                connection.pending.lock().remove(&request_id);
                Err(self.request_timed_out(&account_id))
            }
        }
    }
}

impl<A: Account> LinkService<A> {
    fn request_timed_out(&self, account_id: &AccountId) -> junction_packet::Reject {
        debug!("Request to account {} timed out", account_id);
        RejectBuilder {
            code: ErrorCode::R00_TRANSFER_TIMED_OUT,
            message: &[],
            triggered_by: Some(&self.ilp_address),
            data: &[],
        }
        .build()
    }
}
