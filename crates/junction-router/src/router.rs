use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error};
use parking_lot::RwLock;

use junction_packet::{ErrorCode, RejectBuilder};
use junction_service::{
    Account, AccountId, AccountStore, AddressStore, IlpResult, IncomingRequest, IncomingService,
    OutgoingService,
};

use crate::table::RoutingTable;

/// Store handle the router resolves next hops through. The table is shared
/// with the route manager, which recomputes it as peers advertise routes.
pub trait RouterStore: AccountStore + AddressStore {
    fn routing_table(&self) -> Arc<RwLock<RoutingTable<AccountId>>>;
}

/// Terminal of the incoming chain: looks up the next hop for the Prepare's
/// destination and forwards through the outgoing chain.
#[derive(Clone)]
pub struct Router<S, O> {
    store: S,
    next: O,
    /// Whether a packet may be forwarded back out the account it came in on.
    reflect_payments: bool,
}

impl<S, O> Router<S, O> {
    pub fn new(store: S, next: O) -> Self {
        Router {
            store,
            next,
            reflect_payments: false,
        }
    }

    pub fn with_reflect_payments(mut self, reflect_payments: bool) -> Self {
        self.reflect_payments = reflect_payments;
        self
    }
}

#[async_trait]
impl<S, O> IncomingService<S::Account> for Router<S, O>
where
    S: RouterStore,
    O: OutgoingService<S::Account> + Clone + Send + Sync + 'static,
{
    async fn handle_request(&mut self, request: IncomingRequest<S::Account>) -> IlpResult {
        let ilp_address = self.store.get_ilp_address();
        let destination = request.prepare.destination();

        let next_hop: Option<AccountId> = {
            let table = self.store.routing_table();
            let table = table.read();
            table.resolve(destination.as_str()).cloned()
        };

        let next_hop = match next_hop {
            Some(next_hop) => next_hop,
            None => {
                debug!("No route found for {}", destination);
                return Err(no_route(&ilp_address));
            }
        };

        if next_hop == request.from.id() && !self.reflect_payments {
            debug!(
                "Not forwarding packet for {} back to the account it came from ({})",
                destination, next_hop
            );
            return Err(no_route(&ilp_address));
        }

        let to = match self.store.get_account(&next_hop).await {
            Ok(account) => account,
            Err(_) => {
                // The routing table referenced an account that has since been
                // removed; treat it like a missing route.
                error!("Route for {} points to unknown account {}", destination, next_hop);
                return Err(no_route(&ilp_address));
            }
        };

        debug!(
            "Forwarding packet for {} from account {} to account {}",
            destination,
            request.from.id(),
            to.id()
        );
        match self.next.send_request(request.into_outgoing(to)).await {
            Ok(fulfill) => Ok(fulfill),
            Err(mut reject) => {
                // Relayed rejects keep their original contents, but anonymous
                // ones get stamped with our address.
                if reject.triggered_by().is_none() {
                    reject.set_triggered_by(ilp_address);
                }
                Err(reject)
            }
        }
    }
}

fn no_route(ilp_address: &junction_packet::Address) -> junction_packet::Reject {
    RejectBuilder {
        code: ErrorCode::F02_UNREACHABLE,
        message: b"no route found",
        triggered_by: Some(ilp_address),
        data: &[],
    }
    .build()
}
