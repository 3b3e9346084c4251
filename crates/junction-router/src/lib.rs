//! # junction-router
//!
//! The forwarding table and the service that consults it.
//!
//! The table maps dot-separated address prefixes to next-hop accounts and
//! resolves by longest prefix. The `Router` sits at the end of the incoming
//! chain: it turns an `IncomingRequest` into an `OutgoingRequest` for the
//! best next hop and hands it to the outgoing chain.
//!
//! The router does **not** apply exchange rates, touch balances, or shorten
//! expiries; those belong to the outgoing chain it delegates to.

mod router;
mod table;

pub use self::router::{Router, RouterStore};
pub use self::table::RoutingTable;
