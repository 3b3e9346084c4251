use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use junction_service::AccountId;

use crate::balance::BalanceError;

/// A payment artifact issued by a settlement engine: the opaque request the
/// payer's engine understands (a bolt11 string, a channel claim, ...) plus
/// the decoded destination identity so the payer can check who it pays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub artifact: String,
    pub destination: String,
}

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("settlement engine error: {0}")]
    Engine(String),
    #[error("settlement attempt timed out")]
    Timeout,
    #[error("no settlement engine peered with account {0}")]
    NotPeered(String),
    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),
    #[error("{0}")]
    Balance(#[from] BalanceError),
}

/// Capability set of the underlying value-transfer machinery (a Lightning
/// daemon, an XRP payment channel, ...). The connector only ever issues
/// invoices, pays them, and learns its own identity; everything else is the
/// engine's business.
#[async_trait]
pub trait SettlementEngine: Send + Sync + 'static {
    /// This engine's identity on the value-transfer network, exchanged with
    /// the peer at connect time.
    fn identity(&self) -> String;

    /// Issues an artifact the peer can pay `amount` into.
    async fn create_invoice(&self, amount: u64) -> Result<Invoice, SettlementError>;

    /// Pays `amount` into the peer's artifact. Callers serialize attempts
    /// per account; the engine may assume no concurrent `pay` for the same
    /// account.
    async fn pay(&self, invoice: &Invoice, amount: u64) -> Result<(), SettlementError>;
}

/// Which engine settles which account.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: Arc<RwLock<HashMap<AccountId, Arc<dyn SettlementEngine>>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        EngineRegistry::default()
    }

    pub fn register(&self, account_id: AccountId, engine: Arc<dyn SettlementEngine>) {
        self.engines.write().insert(account_id, engine);
    }

    pub fn get(&self, account_id: &AccountId) -> Option<Arc<dyn SettlementEngine>> {
        self.engines.read().get(account_id).cloned()
    }

    pub fn remove(&self, account_id: &AccountId) {
        self.engines.write().remove(account_id);
    }
}
