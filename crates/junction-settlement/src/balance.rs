use std::convert::TryFrom;
use std::sync::Arc;

use bytes::Bytes;
use log::{error, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use junction_service::{AccountId, ByteStore};

/// Configured balance bounds for one account. Amounts are in the account's
/// own asset units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceSettings {
    pub minimum: i64,
    pub maximum: i64,
    /// Settle when the balance drops below this. Absent means the account is
    /// receive-only and never initiates settlement.
    #[serde(default)]
    pub settle_threshold: Option<i64>,
    /// Settlement brings the balance back up to this level.
    #[serde(default)]
    pub settle_to: i64,
}

#[derive(Error, Debug, PartialEq)]
pub enum BalanceSettingsError {
    #[error("minimum balance must not exceed maximum")]
    BoundsInverted,
    #[error("settle_threshold must lie between minimum and settle_to")]
    ThresholdOutOfRange,
    #[error("settle_to must lie between settle_threshold and maximum")]
    SettleToOutOfRange,
}

impl BalanceSettings {
    /// Enforces `minimum <= settle_threshold <= settle_to <= maximum`.
    pub fn validate(&self) -> Result<(), BalanceSettingsError> {
        if self.minimum > self.maximum {
            return Err(BalanceSettingsError::BoundsInverted);
        }
        if let Some(threshold) = self.settle_threshold {
            if threshold < self.minimum || threshold > self.settle_to {
                return Err(BalanceSettingsError::ThresholdOutOfRange);
            }
            if self.settle_to > self.maximum {
                return Err(BalanceSettingsError::SettleToOutOfRange);
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum BalanceError {
    #[error("crediting {amount} would put balance {balance} over the maximum of {maximum}")]
    ExceedsMaximum {
        balance: i64,
        amount: u64,
        maximum: i64,
    },
    #[error("debiting {amount} would put balance {balance} under the minimum of {minimum}")]
    ExceedsMinimum {
        balance: i64,
        amount: u64,
        minimum: i64,
    },
    #[error("amount does not fit in a signed balance")]
    AmountTooLarge,
}

/// Point-in-time view of a tracker's counters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BalanceSnapshot {
    pub balance: i64,
    /// Cumulative value owed to the peer (accrued by outgoing fulfills).
    pub payout_amount: u64,
    /// Cumulative value paid out to the peer.
    pub settled_amount: u64,
}

// The JSON form persisted under `<account>:account`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PersistedAccount {
    balance: i64,
    payout_amount: u64,
    settled_amount: u64,
    #[serde(default)]
    remote_engine_identity: Option<String>,
    #[serde(default)]
    issued_invoices: Vec<String>,
}

/// The single write path for one account's balance.
///
/// Checked mutators enforce `minimum <= balance <= maximum`; the forced
/// variants are for commit and revert paths that must restore the packet
/// invariant unconditionally. Every mutation updates the store cache
/// synchronously and enqueues a durable write of the JSON snapshot.
pub struct BalanceTracker {
    account_id: AccountId,
    settings: BalanceSettings,
    store: Arc<dyn ByteStore>,
    state: Mutex<PersistedAccount>,
}

impl BalanceTracker {
    /// Creates the tracker, resuming from a persisted snapshot when the store
    /// has one.
    pub fn new(
        account_id: AccountId,
        settings: BalanceSettings,
        store: Arc<dyn ByteStore>,
    ) -> Result<Self, BalanceSettingsError> {
        settings.validate()?;
        let key = storage_key(&account_id);
        let state = match store.get_cached(&key) {
            Some(bytes) => match serde_json::from_slice::<PersistedAccount>(&bytes) {
                Ok(state) => state,
                Err(err) => {
                    error!(
                        "Ignoring corrupt balance snapshot for account {}: {}",
                        account_id, err
                    );
                    PersistedAccount::default()
                }
            },
            None => PersistedAccount::default(),
        };
        Ok(BalanceTracker {
            account_id,
            settings,
            store,
            state: Mutex::new(state),
        })
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn settings(&self) -> &BalanceSettings {
        &self.settings
    }

    pub fn balance(&self) -> i64 {
        self.state.lock().balance
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        let state = self.state.lock();
        BalanceSnapshot {
            balance: state.balance,
            payout_amount: state.payout_amount,
            settled_amount: state.settled_amount,
        }
    }

    /// The peer owes us more. Fails if the balance would exceed the maximum.
    pub fn add_balance(&self, amount: u64) -> Result<i64, BalanceError> {
        let delta = to_signed(amount)?;
        let mut state = self.state.lock();
        let new_balance = state
            .balance
            .checked_add(delta)
            .ok_or(BalanceError::AmountTooLarge)?;
        if new_balance > self.settings.maximum {
            return Err(BalanceError::ExceedsMaximum {
                balance: state.balance,
                amount,
                maximum: self.settings.maximum,
            });
        }
        state.balance = new_balance;
        self.persist(&state);
        Ok(new_balance)
    }

    /// We owe the peer more (or they settled to us). Fails if the balance
    /// would drop under the minimum.
    pub fn sub_balance(&self, amount: u64) -> Result<i64, BalanceError> {
        let delta = to_signed(amount)?;
        let mut state = self.state.lock();
        let new_balance = state
            .balance
            .checked_sub(delta)
            .ok_or(BalanceError::AmountTooLarge)?;
        if new_balance < self.settings.minimum {
            return Err(BalanceError::ExceedsMinimum {
                balance: state.balance,
                amount,
                minimum: self.settings.minimum,
            });
        }
        state.balance = new_balance;
        self.persist(&state);
        Ok(new_balance)
    }

    /// Unchecked credit, for revert paths. Logs if the bound is breached.
    pub fn force_add_balance(&self, amount: u64) -> i64 {
        let delta = to_signed(amount).unwrap_or(i64::max_value());
        let mut state = self.state.lock();
        state.balance = state.balance.saturating_add(delta);
        if state.balance > self.settings.maximum {
            warn!(
                "Account {} balance {} is over its configured maximum of {}",
                self.account_id, state.balance, self.settings.maximum
            );
        }
        self.persist(&state);
        state.balance
    }

    /// Unchecked debit, for commit paths that may not fail after the
    /// downstream already fulfilled. Logs if the bound is breached.
    pub fn force_sub_balance(&self, amount: u64) -> i64 {
        let delta = to_signed(amount).unwrap_or(i64::max_value());
        let mut state = self.state.lock();
        state.balance = state.balance.saturating_sub(delta);
        if state.balance < self.settings.minimum {
            warn!(
                "Account {} balance {} is under its configured minimum of {}",
                self.account_id, state.balance, self.settings.minimum
            );
        }
        self.persist(&state);
        state.balance
    }

    /// Accrues value owed to the peer. Append-only.
    pub fn add_payout(&self, amount: u64) {
        let mut state = self.state.lock();
        state.payout_amount = state.payout_amount.saturating_add(amount);
        self.persist(&state);
    }

    /// Records value paid out to the peer. Append-only; callers persist this
    /// before handing the payment to the engine.
    pub fn add_settled(&self, amount: u64) {
        let mut state = self.state.lock();
        state.settled_amount = state.settled_amount.saturating_add(amount);
        self.persist(&state);
    }

    pub fn remote_engine_identity(&self) -> Option<String> {
        self.state.lock().remote_engine_identity.clone()
    }

    pub fn set_remote_engine_identity(&self, identity: String) {
        let mut state = self.state.lock();
        state.remote_engine_identity = Some(identity);
        self.persist(&state);
    }

    /// Remembers an artifact we issued so the credit for it is only applied
    /// once.
    pub fn record_issued_invoice(&self, artifact: String) {
        let mut state = self.state.lock();
        state.issued_invoices.push(artifact);
        self.persist(&state);
    }

    /// Consumes an issued artifact. Returns false when it was never issued or
    /// was already consumed (a duplicate credit notification).
    pub fn consume_issued_invoice(&self, artifact: &str) -> bool {
        let mut state = self.state.lock();
        match state.issued_invoices.iter().position(|issued| issued == artifact) {
            Some(index) => {
                state.issued_invoices.remove(index);
                self.persist(&state);
                true
            }
            None => false,
        }
    }

    /// Waits until every snapshot enqueued so far is durable.
    pub async fn flush(&self) {
        self.store.flush(&storage_key(&self.account_id)).await;
    }

    fn persist(&self, state: &PersistedAccount) {
        let bytes = serde_json::to_vec(state).expect("snapshots always serialize");
        self.store
            .put(storage_key(&self.account_id), Bytes::from(bytes));
    }
}

fn storage_key(account_id: &AccountId) -> String {
    format!("{}:account", account_id)
}

fn to_signed(amount: u64) -> Result<i64, BalanceError> {
    i64::try_from(amount).map_err(|_| BalanceError::AmountTooLarge)
}

/// Access to the balance trackers the node keeps per account.
pub trait BalanceStore: Clone + Send + Sync + 'static {
    fn balance_tracker(&self, account_id: &AccountId) -> Option<Arc<BalanceTracker>>;
}
