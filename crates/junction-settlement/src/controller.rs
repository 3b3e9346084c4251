use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};

use junction_service::{Account, AccountId, OutgoingRequest, OutgoingService};

use crate::balance::BalanceTracker;
use crate::balance_service::SettlementTrigger;
use crate::engine::{Invoice, SettlementEngine, SettlementError};
use crate::message::SettlementMessage;

const DEFAULT_PAY_TIMEOUT: Duration = Duration::from_secs(60);

/// Settlement progress for one account. Only `Idle` accepts a new run;
/// triggers that land while a run is underway set the recheck flag instead.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SettleState {
    Idle,
    Checking,
    Paying,
}

/// Drives settlement for a single account.
///
/// A trigger moves IDLE to CHECKING and spawns the run; the run computes the
/// budget, obtains an invoice from the peer over the data link, records the
/// payout durably, and pays through the engine, returning to IDLE. At most
/// one engine payment is outstanding per account at any time.
pub struct SettlementController<A, O> {
    account: A,
    tracker: Arc<BalanceTracker>,
    engine: Arc<dyn SettlementEngine>,
    outgoing: O,
    state: Mutex<SettleState>,
    recheck: AtomicBool,
    pay_timeout: Duration,
}

impl<A, O> SettlementController<A, O>
where
    A: Account,
    O: OutgoingService<A> + Clone + Send + Sync + 'static,
{
    pub fn new(
        account: A,
        tracker: Arc<BalanceTracker>,
        engine: Arc<dyn SettlementEngine>,
        outgoing: O,
    ) -> Self {
        SettlementController {
            account,
            tracker,
            engine,
            outgoing,
            state: Mutex::new(SettleState::Idle),
            recheck: AtomicBool::new(false),
            pay_timeout: DEFAULT_PAY_TIMEOUT,
        }
    }

    pub fn with_pay_timeout(mut self, pay_timeout: Duration) -> Self {
        self.pay_timeout = pay_timeout;
        self
    }

    pub fn state(&self) -> SettleState {
        *self.state.lock()
    }

    /// Kicks the settlement loop. Safe to call from anywhere, any number of
    /// times; concurrent triggers collapse into one recheck.
    pub fn trigger(self: Arc<Self>) {
        let mut state = self.state.lock();
        match *state {
            SettleState::Idle => {
                *state = SettleState::Checking;
                drop(state);
                let controller = self.clone();
                tokio::spawn(async move { controller.run().await });
            }
            SettleState::Checking | SettleState::Paying => {
                self.recheck.store(true, Ordering::SeqCst);
            }
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.check_and_settle().await;
            let run_again = {
                let mut state = self.state.lock();
                if self.recheck.swap(false, Ordering::SeqCst) {
                    *state = SettleState::Checking;
                    true
                } else {
                    *state = SettleState::Idle;
                    false
                }
            };
            if !run_again {
                break;
            }
        }
    }

    async fn check_and_settle(&self) {
        let threshold = match self.tracker.settings().settle_threshold {
            Some(threshold) => threshold,
            // Receive-only accounts never initiate settlement.
            None => return,
        };
        let snapshot = self.tracker.snapshot();
        if snapshot.balance >= threshold {
            return;
        }

        let to_restore = self.tracker.settings().settle_to.saturating_sub(snapshot.balance);
        let owed = snapshot.payout_amount.saturating_sub(snapshot.settled_amount);
        let budget = (to_restore.max(0) as u64).min(owed);
        if budget == 0 {
            debug!(
                "Account {} is below its settle threshold but nothing is owed",
                self.account.id()
            );
            return;
        }

        // Reflect the outgoing funds in flight before anything leaves.
        if let Err(err) = self.tracker.add_balance(budget) {
            warn!(
                "Could not reserve settlement of {} for account {}: {}",
                budget,
                self.account.id(),
                err
            );
            return;
        }
        *self.state.lock() = SettleState::Paying;

        let invoice = match self.exchange_invoice(budget).await {
            Ok(invoice) => invoice,
            Err(err) => {
                warn!(
                    "Could not obtain an invoice for {} from account {}: {}",
                    budget,
                    self.account.id(),
                    err
                );
                self.tracker.force_sub_balance(budget);
                return;
            }
        };

        // Record the payout durably before handing the payment to the
        // engine; after this point a crash resumes as if the payment landed
        // and the peer reconciles on the monotonic counter.
        self.tracker.add_settled(budget);
        self.tracker.flush().await;

        match tokio::time::timeout(self.pay_timeout, self.engine.pay(&invoice, budget)).await {
            Ok(Ok(())) => {
                info!(
                    "Settled {} to account {} (balance now {})",
                    budget,
                    self.account.id(),
                    self.tracker.balance()
                );
            }
            Ok(Err(err)) => {
                error!(
                    "Settlement of {} to account {} failed: {}",
                    budget,
                    self.account.id(),
                    err
                );
                self.tracker.force_sub_balance(budget);
            }
            Err(_elapsed) => {
                // The engine may still complete this payment; only the
                // balance is reverted.
                error!(
                    "Settlement of {} to account {} timed out",
                    budget,
                    self.account.id()
                );
                self.tracker.force_sub_balance(budget);
            }
        }
    }

    async fn exchange_invoice(&self, amount: u64) -> Result<Invoice, SettlementError> {
        let prepare = SettlementMessage::InvoiceRequest { amount }.to_prepare();
        let mut outgoing = self.outgoing.clone();
        let fulfill = outgoing
            .send_request(OutgoingRequest {
                from: self.account.clone(),
                to: self.account.clone(),
                original_amount: 0,
                prepare,
            })
            .await
            .map_err(|reject| {
                SettlementError::Engine(format!(
                    "invoice request rejected with {}",
                    reject.code()
                ))
            })?;

        let message: SettlementMessage = serde_json::from_slice(fulfill.data())
            .map_err(|err| SettlementError::InvalidInvoice(err.to_string()))?;
        let invoice = match message {
            SettlementMessage::InvoiceResponse { invoice } => invoice,
            other => {
                return Err(SettlementError::InvalidInvoice(format!(
                    "expected invoice response, got {:?}",
                    other
                )))
            }
        };

        // The artifact must pay the engine we peered with.
        match self.tracker.remote_engine_identity() {
            Some(identity) if identity == invoice.destination => Ok(invoice),
            Some(identity) => Err(SettlementError::InvalidInvoice(format!(
                "invoice pays {} but the peered engine is {}",
                invoice.destination, identity
            ))),
            None => Err(SettlementError::NotPeered(self.account.id().to_string())),
        }
    }

    /// Announces our engine identity to the peer and learns theirs. Run at
    /// link connect.
    pub async fn exchange_peering(&self) -> Result<(), SettlementError> {
        let prepare = SettlementMessage::PeeringRequest {
            engine_identity: self.engine.identity(),
            engine_endpoint: None,
        }
        .to_prepare();
        let mut outgoing = self.outgoing.clone();
        let fulfill = outgoing
            .send_request(OutgoingRequest {
                from: self.account.clone(),
                to: self.account.clone(),
                original_amount: 0,
                prepare,
            })
            .await
            .map_err(|reject| {
                SettlementError::Engine(format!(
                    "peering request rejected with {}",
                    reject.code()
                ))
            })?;
        let message: SettlementMessage = serde_json::from_slice(fulfill.data())
            .map_err(|err| SettlementError::Engine(err.to_string()))?;
        match message {
            SettlementMessage::PeeringResponse {
                engine_identity, ..
            } => {
                debug!(
                    "Account {} settles through engine {}",
                    self.account.id(),
                    engine_identity
                );
                self.tracker.set_remote_engine_identity(engine_identity);
                Ok(())
            }
            other => Err(SettlementError::Engine(format!(
                "expected peering response, got {:?}",
                other
            ))),
        }
    }

    /// The engine reported an incoming credit against an artifact we issued.
    /// Returns the credited amount, or `None` for duplicates and artifacts
    /// we never issued.
    pub fn handle_incoming_credit(&self, artifact: &str, amount: u64) -> Option<u64> {
        if !self.tracker.consume_issued_invoice(artifact) {
            debug!(
                "Ignoring duplicate or unknown settlement credit for account {}",
                self.account.id()
            );
            return None;
        }
        let balance = self.tracker.force_sub_balance(amount);
        info!(
            "Account {} settled {} to us (balance now {})",
            self.account.id(),
            amount,
            balance
        );
        Some(amount)
    }

    /// Money arrived over the peer link itself (a TRANSFER frame).
    pub fn handle_incoming_transfer(&self, amount: u64) {
        let balance = self.tracker.force_sub_balance(amount);
        debug!(
            "Account {} transferred {} over the link (balance now {})",
            self.account.id(),
            amount,
            balance
        );
    }
}

/// The controllers of every settling account, addressable by id.
pub struct SettlementControllers<A, O> {
    controllers: Arc<RwLock<HashMap<AccountId, Arc<SettlementController<A, O>>>>>,
}

impl<A, O> Clone for SettlementControllers<A, O> {
    fn clone(&self) -> Self {
        SettlementControllers {
            controllers: self.controllers.clone(),
        }
    }
}

impl<A, O> Default for SettlementControllers<A, O> {
    fn default() -> Self {
        SettlementControllers {
            controllers: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<A, O> SettlementControllers<A, O>
where
    A: Account,
    O: OutgoingService<A> + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        SettlementControllers::default()
    }

    pub fn register(&self, account_id: AccountId, controller: Arc<SettlementController<A, O>>) {
        self.controllers.write().insert(account_id, controller);
    }

    pub fn get(&self, account_id: &AccountId) -> Option<Arc<SettlementController<A, O>>> {
        self.controllers.read().get(account_id).cloned()
    }

    pub fn remove(&self, account_id: &AccountId) {
        self.controllers.write().remove(account_id);
    }
}

impl<A, O> SettlementTrigger for SettlementControllers<A, O>
where
    A: Account,
    O: OutgoingService<A> + Clone + Send + Sync + 'static,
{
    fn trigger_settlement(&self, account_id: &AccountId) {
        match self.get(account_id) {
            Some(controller) => controller.trigger(),
            None => debug!("No settlement controller for account {}", account_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::test_helpers::CacheStore;
    use crate::balance::BalanceSettings;
    use crate::engine::test_helpers::TestEngine;
    use junction_packet::Address;
    use junction_service::{outgoing_service_fn, IlpResult};
    use std::str::FromStr;

    #[derive(Clone, Debug)]
    struct TestAccount(AccountId, Address);

    impl Account for TestAccount {
        fn id(&self) -> AccountId {
            self.0.clone()
        }

        fn ilp_address(&self) -> &Address {
            &self.1
        }

        fn asset_code(&self) -> &str {
            "BTC"
        }

        fn asset_scale(&self) -> u8 {
            0
        }
    }

    fn account() -> TestAccount {
        TestAccount(
            AccountId::from_str("peer-a").unwrap(),
            Address::new("example.peer-a"),
        )
    }

    fn tracker(settle_threshold: i64, settle_to: i64) -> Arc<BalanceTracker> {
        Arc::new(
            BalanceTracker::new(
                AccountId::from_str("peer-a").unwrap(),
                BalanceSettings {
                    minimum: -1000,
                    maximum: 1000,
                    settle_threshold: Some(settle_threshold),
                    settle_to,
                },
                Arc::new(CacheStore::default()),
            )
            .unwrap(),
        )
    }

    /// Plays the remote message service: answers invoice requests with an
    /// invoice paying `engine_identity`.
    fn invoice_answering_service(
        engine_identity: &'static str,
    ) -> impl OutgoingService<TestAccount> + Clone + Send + Sync + 'static {
        outgoing_service_fn(move |request: junction_service::OutgoingRequest<TestAccount>| -> IlpResult {
            let message: SettlementMessage =
                serde_json::from_slice(request.prepare.data()).unwrap();
            match message {
                SettlementMessage::InvoiceRequest { amount } => {
                    Ok(SettlementMessage::InvoiceResponse {
                        invoice: Invoice {
                            artifact: format!("artifact-{}", amount),
                            destination: engine_identity.to_string(),
                        },
                    }
                    .to_fulfill())
                }
                SettlementMessage::PeeringRequest { .. } => {
                    Ok(SettlementMessage::PeeringResponse {
                        engine_identity: engine_identity.to_string(),
                        engine_endpoint: None,
                    }
                    .to_fulfill())
                }
                other => panic!("unexpected message: {:?}", other),
            }
        })
    }

    async fn settle_and_wait<A, O>(controller: &Arc<SettlementController<A, O>>)
    where
        A: Account,
        O: OutgoingService<A> + Clone + Send + Sync + 'static,
    {
        controller.clone().trigger();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if controller.state() == SettleState::Idle {
                return;
            }
        }
        panic!("settlement did not return to idle");
    }

    #[tokio::test]
    async fn settles_the_owed_amount_once() {
        let tracker = tracker(-100, 0);
        // Two outgoing fulfills of 75 put the balance at -150 with 150 owed.
        tracker.force_sub_balance(75);
        tracker.add_payout(75);
        tracker.force_sub_balance(75);
        tracker.add_payout(75);

        let engine = Arc::new(TestEngine::new("ln-remote"));
        let controller = Arc::new(SettlementController::new(
            account(),
            tracker.clone(),
            engine.clone(),
            invoice_answering_service("ln-remote"),
        ));
        controller.exchange_peering().await.unwrap();

        settle_and_wait(&controller).await;

        let payments = engine.payments.lock().clone();
        assert_eq!(payments, vec![("artifact-150".to_string(), 150)]);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.balance, 0);
        assert_eq!(snapshot.settled_amount, 150);
        assert_eq!(snapshot.payout_amount, 150);

        // A second trigger finds nothing owed and pays nothing.
        settle_and_wait(&controller).await;
        assert_eq!(engine.payments.lock().len(), 1);
    }

    #[tokio::test]
    async fn does_not_settle_above_the_threshold() {
        let tracker = tracker(-100, 0);
        // Below zero but above the threshold.
        tracker.force_sub_balance(50);
        tracker.add_payout(50);
        let engine = Arc::new(TestEngine::new("ln-remote"));
        let controller = Arc::new(SettlementController::new(
            account(),
            tracker.clone(),
            engine.clone(),
            invoice_answering_service("ln-remote"),
        ));
        controller.exchange_peering().await.unwrap();
        settle_and_wait(&controller).await;
        assert!(engine.payments.lock().is_empty());
        assert_eq!(tracker.balance(), -50);
    }

    #[tokio::test]
    async fn does_not_settle_more_than_was_owed() {
        // Past the threshold, but no outgoing fulfills accrued any payout
        // (the deficit came from somewhere else): nothing to settle with.
        let tracker = tracker(-100, 0);
        tracker.force_sub_balance(150);
        let engine = Arc::new(TestEngine::new("ln-remote"));
        let controller = Arc::new(SettlementController::new(
            account(),
            tracker.clone(),
            engine.clone(),
            invoice_answering_service("ln-remote"),
        ));
        controller.exchange_peering().await.unwrap();
        settle_and_wait(&controller).await;
        assert!(engine.payments.lock().is_empty());
        assert_eq!(tracker.balance(), -150);

        // Once something is owed, the budget is capped by it.
        tracker.add_payout(60);
        settle_and_wait(&controller).await;
        assert_eq!(engine.payments.lock().clone(), vec![("artifact-60".to_string(), 60)]);
        assert_eq!(tracker.balance(), -90);
        assert_eq!(tracker.snapshot().settled_amount, 60);
    }

    #[tokio::test]
    async fn engine_failure_reverts_the_balance() {
        let tracker = tracker(-100, 0);
        tracker.force_sub_balance(150);
        tracker.add_payout(150);

        let mut engine = TestEngine::new("ln-remote");
        engine.fail_payments = true;
        let engine = Arc::new(engine);
        let controller = Arc::new(SettlementController::new(
            account(),
            tracker.clone(),
            engine.clone(),
            invoice_answering_service("ln-remote"),
        ));
        controller.exchange_peering().await.unwrap();
        settle_and_wait(&controller).await;

        assert_eq!(tracker.balance(), -150);
        assert!(engine.payments.lock().is_empty());
    }

    #[tokio::test]
    async fn rejects_invoices_paying_the_wrong_engine() {
        let tracker = tracker(-100, 0);
        tracker.force_sub_balance(150);
        tracker.add_payout(150);

        let engine = Arc::new(TestEngine::new("ln-local"));
        let controller = Arc::new(SettlementController::new(
            account(),
            tracker.clone(),
            engine.clone(),
            invoice_answering_service("ln-mallory"),
        ));
        // Peered with someone else entirely.
        tracker.set_remote_engine_identity("ln-remote".to_string());
        settle_and_wait(&controller).await;

        assert!(engine.payments.lock().is_empty());
        assert_eq!(tracker.balance(), -150);
        assert_eq!(tracker.snapshot().settled_amount, 0);
    }

    #[tokio::test]
    async fn concurrent_triggers_pay_at_most_once() {
        let tracker = tracker(-100, 0);
        tracker.force_sub_balance(150);
        tracker.add_payout(150);

        let mut engine = TestEngine::new("ln-remote");
        engine.pay_delay = Some(Duration::from_millis(50));
        let engine = Arc::new(engine);
        let controller = Arc::new(SettlementController::new(
            account(),
            tracker.clone(),
            engine.clone(),
            invoice_answering_service("ln-remote"),
        ));
        controller.exchange_peering().await.unwrap();

        for _ in 0..10 {
            controller.clone().trigger();
        }
        settle_and_wait(&controller).await;

        assert_eq!(engine.payments.lock().len(), 1);
        assert_eq!(tracker.balance(), 0);
    }

    #[tokio::test]
    async fn incoming_credits_are_deduplicated() {
        let tracker = tracker(-100, 0);
        tracker.add_balance(200).unwrap();
        tracker.record_issued_invoice("lnbc-a".to_string());

        let engine = Arc::new(TestEngine::new("ln-local"));
        let controller = Arc::new(SettlementController::new(
            account(),
            tracker.clone(),
            engine,
            invoice_answering_service("ln-remote"),
        ));

        assert_eq!(controller.handle_incoming_credit("lnbc-a", 200), Some(200));
        assert_eq!(tracker.balance(), 0);
        // Replay is ignored.
        assert_eq!(controller.handle_incoming_credit("lnbc-a", 200), None);
        assert_eq!(tracker.balance(), 0);
        assert_eq!(controller.handle_incoming_credit("unknown", 10), None);
    }
}
