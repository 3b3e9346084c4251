use async_trait::async_trait;
use log::{debug, warn};

use junction_packet::{ErrorCode, RejectBuilder};
use junction_service::{
    Account, AccountId, AddressStore, IlpResult, OutgoingRequest, OutgoingService,
};

use crate::balance::BalanceStore;

/// Hook the balance middleware pokes when an account's balance crosses its
/// settle threshold. Settlement runs out of band; forwarding never blocks on
/// it.
pub trait SettlementTrigger: Clone + Send + Sync + 'static {
    fn trigger_settlement(&self, account_id: &AccountId);
}

/// Trigger for nodes without settlement wired up (and for tests).
#[derive(Clone)]
pub struct NoTrigger;

impl SettlementTrigger for NoTrigger {
    fn trigger_settlement(&self, _account_id: &AccountId) {}
}

/// Applies packet accounting to both accounts of an outgoing request.
///
/// On the Prepare, the ingress account's balance is optimistically credited
/// (they owe us for the packet we are about to forward); a bound breach
/// rejects with T04 before anything is sent. On the Fulfill, the egress
/// account is debited and the amount accrues as payout owed. On a Reject or
/// timeout the optimistic credit is reverted, leaving both balances as they
/// were.
#[derive(Clone)]
pub struct BalanceService<S, O, T> {
    store: S,
    trigger: T,
    next: O,
}

impl<S, O, T> BalanceService<S, O, T> {
    pub fn new(store: S, trigger: T, next: O) -> Self {
        BalanceService {
            store,
            trigger,
            next,
        }
    }
}

#[async_trait]
impl<S, O, T, A> OutgoingService<A> for BalanceService<S, O, T>
where
    S: AddressStore + BalanceStore,
    O: OutgoingService<A> + Send + Sync,
    T: SettlementTrigger,
    A: Account,
{
    async fn send_request(&mut self, request: OutgoingRequest<A>) -> IlpResult {
        // Zero-amount packets (protocol messages, probes) carry no value.
        if request.prepare.amount() == 0 && request.original_amount == 0 {
            return self.next.send_request(request).await;
        }

        let from_id = request.from.id();
        let to_id = request.to.id();
        let incoming_amount = request.original_amount;
        let outgoing_amount = request.prepare.amount();

        let from_tracker = match self.store.balance_tracker(&from_id) {
            Some(tracker) => tracker,
            None => {
                warn!("No balance tracker for account {}; skipping accounting", from_id);
                return self.next.send_request(request).await;
            }
        };

        if let Err(err) = from_tracker.add_balance(incoming_amount) {
            debug!(
                "Rejecting packet from account {} that would breach its balance limit: {}",
                from_id, err
            );
            return Err(RejectBuilder {
                code: ErrorCode::T04_INSUFFICIENT_LIQUIDITY,
                message: &[],
                triggered_by: Some(&self.store.get_ilp_address()),
                data: &[],
            }
            .build());
        }

        match self.next.send_request(request).await {
            Ok(fulfill) => {
                // The downstream delivered: we now owe the egress peer. This
                // may not fail, the fulfillment is already on its way back.
                if let Some(to_tracker) = self.store.balance_tracker(&to_id) {
                    let balance = to_tracker.force_sub_balance(outgoing_amount);
                    to_tracker.add_payout(outgoing_amount);
                    debug!(
                        "Account {} balance after fulfill: {} (paid out {})",
                        to_id, balance, outgoing_amount
                    );
                    let crossed_threshold = to_tracker
                        .settings()
                        .settle_threshold
                        .map(|threshold| balance < threshold)
                        .unwrap_or(false);
                    if crossed_threshold {
                        self.trigger.trigger_settlement(&to_id);
                    }
                } else {
                    warn!("No balance tracker for egress account {}", to_id);
                }
                Ok(fulfill)
            }
            Err(reject) => {
                // Revert the optimistic ingress credit.
                from_tracker.force_sub_balance(incoming_amount);
                Err(reject)
            }
        }
    }
}
