//! # junction-ccp
//!
//! The Connector-to-Connector Protocol: exchanging route updates with peers
//! and selecting the best next hop per prefix.
//!
//! The [`CcpRouteManager`] consumes `peer.route.control` and
//! `peer.route.update` messages from accounts we accept routes from, keeps a
//! per-peer view of their advertised tables, and writes the winning routes
//! into the shared routing table the `Router` forwards by. Epoch diffs are
//! broadcast to subscribed peers on a timer, and only acknowledged epochs
//! advance a peer's cursor.

mod manager;
mod packet;
mod peer_table;

#[cfg(test)]
mod fixtures;
#[cfg(test)]
mod manager_test;

use junction_service::{Account, RoutingRelation};

pub use self::manager::{CcpConfig, CcpRouteManager};
pub use self::packet::{
    Mode, Route, RouteControlRequest, RouteProp, RouteUpdateRequest, CCP_CONTROL_DESTINATION,
    CCP_RESPONSE, CCP_UPDATE_DESTINATION, PEER_PROTOCOL_CONDITION, PEER_PROTOCOL_FULFILLMENT,
};

/// What the route manager needs to know about an account.
pub trait CcpRoutingAccount: Account {
    /// The type of relationship we have with this account.
    fn routing_relation(&self) -> RoutingRelation;

    /// Tie-break weight for route selection; lower wins.
    fn routing_weight(&self) -> u32 {
        self.routing_relation().default_weight()
    }

    /// Whether we send CCP route updates to this account.
    fn should_send_routes(&self) -> bool {
        matches!(
            self.routing_relation(),
            RoutingRelation::Child | RoutingRelation::Peer
        )
    }

    /// Whether we accept CCP route updates from this account.
    fn should_receive_routes(&self) -> bool {
        matches!(
            self.routing_relation(),
            RoutingRelation::Parent | RoutingRelation::Peer
        )
    }
}
