//! # junction-settlement
//!
//! Bilateral credit accounting and out-of-band settlement.
//!
//! Every account owns a [`BalanceTracker`]: the only write path for its
//! balance, bounded by the configured minimum and maximum. The
//! [`BalanceService`] middleware drives the tracker from the packet
//! pipeline. When a balance crosses the account's settle threshold, its
//! [`SettlementController`] runs the settlement loop: budget, invoice
//! exchange over the data link, then a [`SettlementEngine`] payment, with at
//! most one attempt outstanding per account.

mod balance;
mod balance_service;
mod controller;
mod engine;
mod message;

pub use self::balance::{
    BalanceError, BalanceSettings, BalanceSettingsError, BalanceSnapshot, BalanceStore,
    BalanceTracker,
};
pub use self::balance_service::{BalanceService, NoTrigger, SettlementTrigger};
pub use self::controller::{SettleState, SettlementController, SettlementControllers};
pub use self::engine::{EngineRegistry, Invoice, SettlementEngine, SettlementError};
pub use self::message::{
    SettlementMessage, SettlementMessageService, PEER_PROTOCOL_CONDITION,
    PEER_PROTOCOL_FULFILLMENT, SETTLEMENT_ADDRESS,
};
