//! # junction-store
//!
//! The node's state: a synchronous read cache over an ordered-write durable
//! layer, the account registry, the shared routing table, balance trackers,
//! and exchange rates. [`InMemoryStore`] implements every store trait the
//! service crates define, so the whole node is wired against one handle.

mod account;
mod store;

pub use self::account::{Account, AccountBuilder};
pub use self::store::InMemoryStore;
