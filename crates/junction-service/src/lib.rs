//! # junction-service
//!
//! The core abstractions of the connector: accounts, the incoming/outgoing
//! service chain, and the store interfaces the leaf crates persist through.
//!
//! A node is assembled by composing services. An `IncomingService` handles
//! Prepare packets arriving *from* a peer; an `OutgoingService` sends Prepare
//! packets *to* a peer. Middleware implement one (or both) of the traits and
//! delegate to the `next` service they wrap, so a whole node is one incoming
//! chain ending in a router plus one outgoing chain ending in the peer links.
//!
//! Errors on the data path are `Reject` packets, never exceptions: every
//! handler returns [`IlpResult`].

mod account;
mod errors;

use std::marker::PhantomData;

use async_trait::async_trait;
use bytes::Bytes;

use junction_packet::{Address, Fulfill, Prepare, Reject};

pub use self::account::{AccountId, AccountIdError, RoutingRelation};
pub use self::errors::{AccountStoreError, AddressStoreError};

/// The outcome of handling an ILP Prepare: a Fulfill or a Reject.
pub type IlpResult = Result<Fulfill, Reject>;

/// Attributes every peer account exposes to the packet pipeline. Concern-
/// specific attributes (max packet amount, routing relation, settlement
/// configuration) live in extension traits next to the services that need
/// them.
pub trait Account: Clone + Send + Sync + 'static {
    fn id(&self) -> AccountId;
    fn ilp_address(&self) -> &Address;
    fn asset_code(&self) -> &str;
    fn asset_scale(&self) -> u8;
}

/// A Prepare packet with the account it arrived from.
#[derive(Clone, Debug)]
pub struct IncomingRequest<A: Account> {
    pub from: A,
    pub prepare: Prepare,
}

/// A Prepare packet with the accounts it is travelling between.
///
/// `original_amount` preserves the amount the packet carried on ingress so
/// services behind the exchange-rate conversion can still see it.
#[derive(Clone, Debug)]
pub struct OutgoingRequest<A: Account> {
    pub from: A,
    pub to: A,
    pub original_amount: u64,
    pub prepare: Prepare,
}

impl<A: Account> IncomingRequest<A> {
    pub fn into_outgoing(self, to: A) -> OutgoingRequest<A> {
        OutgoingRequest {
            original_amount: self.prepare.amount(),
            from: self.from,
            to,
            prepare: self.prepare,
        }
    }
}

/// Handles packets arriving from a peer.
#[async_trait]
pub trait IncomingService<A: Account> {
    async fn handle_request(&mut self, request: IncomingRequest<A>) -> IlpResult;
}

/// Sends packets towards a peer.
#[async_trait]
pub trait OutgoingService<A: Account> {
    async fn send_request(&mut self, request: OutgoingRequest<A>) -> IlpResult;
}

/// Wraps a closure as an `IncomingService`, mostly for chain endpoints and
/// tests.
pub fn incoming_service_fn<A, F>(handler: F) -> ServiceFn<F, A>
where
    A: Account,
    F: FnMut(IncomingRequest<A>) -> IlpResult,
{
    ServiceFn {
        handler,
        account_type: PhantomData,
    }
}

/// Wraps a closure as an `OutgoingService`.
pub fn outgoing_service_fn<A, F>(handler: F) -> ServiceFn<F, A>
where
    A: Account,
    F: FnMut(OutgoingRequest<A>) -> IlpResult,
{
    ServiceFn {
        handler,
        account_type: PhantomData,
    }
}

#[derive(Clone)]
pub struct ServiceFn<F, A> {
    handler: F,
    account_type: PhantomData<A>,
}

#[async_trait]
impl<F, A> IncomingService<A> for ServiceFn<F, A>
where
    A: Account,
    F: FnMut(IncomingRequest<A>) -> IlpResult + Send + Sync,
{
    async fn handle_request(&mut self, request: IncomingRequest<A>) -> IlpResult {
        (self.handler)(request)
    }
}

#[async_trait]
impl<F, A> OutgoingService<A> for ServiceFn<F, A>
where
    A: Account,
    F: FnMut(OutgoingRequest<A>) -> IlpResult + Send + Sync,
{
    async fn send_request(&mut self, request: OutgoingRequest<A>) -> IlpResult {
        (self.handler)(request)
    }
}

trait DynIncomingService<A: Account>: IncomingService<A> + Send + Sync {
    fn clone_box(&self) -> Box<dyn DynIncomingService<A>>;
}

impl<T, A> DynIncomingService<A> for T
where
    T: IncomingService<A> + Clone + Send + Sync + 'static,
    A: Account,
{
    fn clone_box(&self) -> Box<dyn DynIncomingService<A>> {
        Box::new(self.clone())
    }
}

/// A cloneable, type-erased incoming chain. Lets fully composed chains be
/// stored and handed around without naming the nested service types.
pub struct BoxedIncomingService<A: Account>(Box<dyn DynIncomingService<A>>);

impl<A: Account> BoxedIncomingService<A> {
    pub fn new<I>(service: I) -> Self
    where
        I: IncomingService<A> + Clone + Send + Sync + 'static,
    {
        BoxedIncomingService(Box::new(service))
    }
}

impl<A: Account> Clone for BoxedIncomingService<A> {
    fn clone(&self) -> Self {
        BoxedIncomingService(self.0.clone_box())
    }
}

#[async_trait]
impl<A: Account> IncomingService<A> for BoxedIncomingService<A> {
    async fn handle_request(&mut self, request: IncomingRequest<A>) -> IlpResult {
        self.0.handle_request(request).await
    }
}

trait DynOutgoingService<A: Account>: OutgoingService<A> + Send + Sync {
    fn clone_box(&self) -> Box<dyn DynOutgoingService<A>>;
}

impl<T, A> DynOutgoingService<A> for T
where
    T: OutgoingService<A> + Clone + Send + Sync + 'static,
    A: Account,
{
    fn clone_box(&self) -> Box<dyn DynOutgoingService<A>> {
        Box::new(self.clone())
    }
}

/// A cloneable, type-erased outgoing chain.
pub struct BoxedOutgoingService<A: Account>(Box<dyn DynOutgoingService<A>>);

impl<A: Account> BoxedOutgoingService<A> {
    pub fn new<O>(service: O) -> Self
    where
        O: OutgoingService<A> + Clone + Send + Sync + 'static,
    {
        BoxedOutgoingService(Box::new(service))
    }
}

impl<A: Account> Clone for BoxedOutgoingService<A> {
    fn clone(&self) -> Self {
        BoxedOutgoingService(self.0.clone_box())
    }
}

#[async_trait]
impl<A: Account> OutgoingService<A> for BoxedOutgoingService<A> {
    async fn send_request(&mut self, request: OutgoingRequest<A>) -> IlpResult {
        self.0.send_request(request).await
    }
}

/// Provides this node's own ILP address.
#[async_trait]
pub trait AddressStore: Clone + Send + Sync + 'static {
    async fn set_ilp_address(&self, ilp_address: Address) -> Result<(), AddressStoreError>;

    async fn clear_ilp_address(&self) -> Result<(), AddressStoreError>;

    /// Reads from the in-memory cache; infallible once the node is up.
    fn get_ilp_address(&self) -> Address;
}

/// Registry of the accounts this node knows about.
#[async_trait]
pub trait AccountStore: Clone + Send + Sync + 'static {
    type Account: Account;

    async fn get_account(&self, id: &AccountId) -> Result<Self::Account, AccountStoreError>;

    async fn get_all_accounts(&self) -> Vec<Self::Account>;
}

/// Key/value persistence with a synchronous read cache.
///
/// `put` updates the cache immediately and enqueues a durable write; writes
/// against the same key reach the durable layer in the order they were
/// issued, while different keys may be written concurrently. `flush` waits
/// until every write enqueued for `key` so far is durable.
///
/// Object safe so per-account state (balance trackers) can hold
/// `Arc<dyn ByteStore>`.
#[async_trait]
pub trait ByteStore: Send + Sync + 'static {
    fn get_cached(&self, key: &str) -> Option<Bytes>;

    fn put(&self, key: String, value: Bytes);

    async fn flush(&self, key: &str);
}
