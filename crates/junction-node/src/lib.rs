//! # junction-node
//!
//! An Interledger connector node assembled from the junction crates: it
//! boots the configured accounts, composes the incoming and outgoing service
//! chains once, services peer links in both roles, and runs the route
//! broadcast and settlement machinery.

mod config;
mod node;

pub use self::config::{AccountConfig, BalanceConfig, NodeConfig, RateLimitConfig};
pub use self::node::{JunctionNode, NodeError, NodeHandle};
