use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use junction_packet::Address;
use junction_router::{RouterStore, RoutingTable};
use junction_service::{
    AccountId, AccountStore, AccountStoreError, AddressStore, AddressStoreError, ByteStore,
};
use junction_service_util::{ExchangeRateStore, ExchangeRateStoreError};
use junction_settlement::{BalanceSettingsError, BalanceStore, BalanceTracker};

use crate::account::Account;

// Writes queued for one key, drained in issue order by a single task.
#[derive(Default)]
struct KeyQueue {
    queue: VecDeque<Bytes>,
    draining: bool,
    drained: Arc<Notify>,
}

#[derive(Default)]
struct DurableLayer {
    entries: RwLock<HashMap<String, Bytes>>,
    pending: Mutex<HashMap<String, KeyQueue>>,
}

/// The key/value half of the store: a synchronous cache over per-key ordered
/// durable writes. Balance trackers hold this handle rather than the whole
/// store.
#[derive(Clone, Default)]
pub(crate) struct ByteStoreHandle {
    cache: Arc<RwLock<HashMap<String, Bytes>>>,
    durable: Arc<DurableLayer>,
}

#[async_trait]
impl ByteStore for ByteStoreHandle {
    fn get_cached(&self, key: &str) -> Option<Bytes> {
        self.cache.read().get(key).cloned()
    }

    fn put(&self, key: String, value: Bytes) {
        // The cache sees the write immediately.
        self.cache.write().insert(key.clone(), value.clone());

        // Enqueue the durable write; one drain task per key keeps writes in
        // issue order.
        let spawn_drain = {
            let mut pending = self.durable.pending.lock();
            let entry = pending.entry(key.clone()).or_default();
            entry.queue.push_back(value);
            if entry.draining {
                false
            } else {
                entry.draining = true;
                true
            }
        };

        if spawn_drain {
            let durable = self.durable.clone();
            tokio::spawn(async move {
                loop {
                    let next = {
                        let mut pending = durable.pending.lock();
                        let entry = pending.get_mut(&key).expect("queue exists while draining");
                        match entry.queue.pop_front() {
                            Some(value) => Some(value),
                            None => {
                                entry.draining = false;
                                entry.drained.notify_waiters();
                                None
                            }
                        }
                    };
                    match next {
                        Some(value) => {
                            durable.entries.write().insert(key.clone(), value);
                            // Let concurrently queued writes for other keys in.
                            tokio::task::yield_now().await;
                        }
                        None => break,
                    }
                }
            });
        }
    }

    async fn flush(&self, key: &str) {
        loop {
            let (done, notify) = {
                let pending = self.durable.pending.lock();
                match pending.get(key) {
                    None => return,
                    Some(entry) => (
                        entry.queue.is_empty() && !entry.draining,
                        entry.drained.clone(),
                    ),
                }
            };
            if done {
                return;
            }
            let notified = notify.notified();
            // Re-check so a drain finishing between the check and here does
            // not leave us waiting forever.
            {
                let pending = self.durable.pending.lock();
                match pending.get(key) {
                    None => return,
                    Some(entry) => {
                        if entry.queue.is_empty() && !entry.draining {
                            return;
                        }
                    }
                }
            }
            notified.await;
        }
    }
}

/// The whole node state behind one cloneable handle.
#[derive(Clone)]
pub struct InMemoryStore {
    ilp_address: Arc<RwLock<Address>>,
    accounts: Arc<RwLock<HashMap<AccountId, Account>>>,
    balances: Arc<RwLock<HashMap<AccountId, Arc<BalanceTracker>>>>,
    routing_table: Arc<RwLock<RoutingTable<AccountId>>>,
    rates: Arc<RwLock<HashMap<String, f64>>>,
    bytes: ByteStoreHandle,
}

impl InMemoryStore {
    pub fn new(ilp_address: Address) -> Self {
        InMemoryStore {
            ilp_address: Arc::new(RwLock::new(ilp_address)),
            accounts: Arc::new(RwLock::new(HashMap::new())),
            balances: Arc::new(RwLock::new(HashMap::new())),
            routing_table: Arc::new(RwLock::new(RoutingTable::new())),
            rates: Arc::new(RwLock::new(HashMap::new())),
            bytes: ByteStoreHandle::default(),
        }
    }

    /// Registers an account and creates its balance tracker, resuming from
    /// any persisted snapshot.
    pub fn add_account(&self, account: Account) -> Result<(), BalanceSettingsError> {
        use junction_service::Account as _;
        let id = account.id();
        let tracker = BalanceTracker::new(
            id.clone(),
            *account.balance_settings(),
            Arc::new(self.bytes.clone()),
        )?;
        self.accounts.write().insert(id.clone(), account);
        self.balances.write().insert(id, Arc::new(tracker));
        Ok(())
    }

    /// Removes an account. Its routes disappear with it; in-flight packets
    /// referencing it will fail routing.
    pub fn remove_account(&self, account_id: &AccountId) {
        self.accounts.write().remove(account_id);
        self.balances.write().remove(account_id);
        let mut table = self.routing_table.write();
        let stale: Vec<String> = table
            .prefixes()
            .into_iter()
            .filter(|prefix| table.get(prefix) == Some(account_id))
            .collect();
        for prefix in stale {
            table.delete(&prefix);
        }
    }

    #[cfg(test)]
    fn read_durable(&self, key: &str) -> Option<Bytes> {
        self.bytes.durable.entries.read().get(key).cloned()
    }
}

#[async_trait]
impl ByteStore for InMemoryStore {
    fn get_cached(&self, key: &str) -> Option<Bytes> {
        self.bytes.get_cached(key)
    }

    fn put(&self, key: String, value: Bytes) {
        self.bytes.put(key, value)
    }

    async fn flush(&self, key: &str) {
        self.bytes.flush(key).await
    }
}

#[async_trait]
impl AddressStore for InMemoryStore {
    async fn set_ilp_address(&self, ilp_address: Address) -> Result<(), AddressStoreError> {
        debug!("Setting node ILP address to {}", ilp_address);
        *self.ilp_address.write() = ilp_address;
        Ok(())
    }

    async fn clear_ilp_address(&self) -> Result<(), AddressStoreError> {
        Err(AddressStoreError::Other(
            "the node address cannot be cleared".to_string(),
        ))
    }

    fn get_ilp_address(&self) -> Address {
        self.ilp_address.read().clone()
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    type Account = Account;

    async fn get_account(&self, id: &AccountId) -> Result<Account, AccountStoreError> {
        self.accounts
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| AccountStoreError::AccountNotFound(id.to_string()))
    }

    async fn get_all_accounts(&self) -> Vec<Account> {
        self.accounts.read().values().cloned().collect()
    }
}

impl RouterStore for InMemoryStore {
    fn routing_table(&self) -> Arc<RwLock<RoutingTable<AccountId>>> {
        self.routing_table.clone()
    }
}

impl ExchangeRateStore for InMemoryStore {
    fn set_exchange_rates(&self, rates: HashMap<String, f64>) {
        *self.rates.write() = rates;
    }

    fn get_exchange_rates(&self, asset_codes: &[&str]) -> Result<Vec<f64>, ExchangeRateStoreError> {
        let rates = self.rates.read();
        asset_codes
            .iter()
            .map(|code| {
                rates
                    .get(*code)
                    .copied()
                    .ok_or_else(|| ExchangeRateStoreError::PairNotFound(code.to_string()))
            })
            .collect()
    }

    fn get_all_exchange_rates(&self) -> HashMap<String, f64> {
        self.rates.read().clone()
    }
}

impl BalanceStore for InMemoryStore {
    fn balance_tracker(&self, account_id: &AccountId) -> Option<Arc<BalanceTracker>> {
        self.balances.read().get(account_id).cloned()
    }
}
