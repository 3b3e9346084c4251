use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::packet::{Route, RouteUpdateRequest};

/// A remote route plus the moment the peer last refreshed it.
pub(crate) struct RouteEntry {
    pub route: Route,
    pub refreshed_at: Instant,
}

/// Applying an update to a peer's table either changes some prefixes, does
/// nothing, or reveals that we lost sync with the peer.
pub(crate) enum UpdateOutcome {
    Applied(Vec<String>),
    Ignored,
    /// Peer state was discarded; the listed prefixes vanished with it and
    /// the caller must request a fresh SYNC.
    NeedsSync(Vec<String>),
}

/// The last known advertised table of one peer, versioned by the peer's
/// routing table id and epoch.
pub(crate) struct PeerRoutes {
    routing_table_id: Option<[u8; 16]>,
    epoch: u32,
    routes: HashMap<String, RouteEntry>,
}

impl Default for PeerRoutes {
    fn default() -> Self {
        PeerRoutes {
            routing_table_id: None,
            epoch: 0,
            routes: HashMap::new(),
        }
    }
}

impl PeerRoutes {
    pub fn routing_table_id(&self) -> Option<[u8; 16]> {
        self.routing_table_id
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn route_for(&self, prefix: &str) -> Option<&Route> {
        self.routes.get(prefix).map(|entry| &entry.route)
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &String> {
        self.routes.keys()
    }

    fn discard_routes(&mut self) -> Vec<String> {
        self.epoch = 0;
        self.routes.drain().map(|(prefix, _)| prefix).collect()
    }

    /// Applies an incremental update. `now` stamps refreshed routes.
    pub fn handle_update(&mut self, update: RouteUpdateRequest, now: Instant) -> UpdateOutcome {
        match self.routing_table_id {
            Some(id) if id == update.routing_table_id => {}
            Some(id) => {
                // The peer restarted with a new table; everything we knew
                // about it is stale.
                debug!(
                    "Peer switched routing table {:x?} -> {:x?}",
                    id, update.routing_table_id
                );
                let dropped = self.discard_routes();
                self.routing_table_id = Some(update.routing_table_id);
                return UpdateOutcome::NeedsSync(dropped);
            }
            None => {
                self.routing_table_id = Some(update.routing_table_id);
            }
        }

        if update.from_epoch_index > self.epoch {
            debug!(
                "Gap in route updates: expected epoch {}, update covers [{}, {})",
                self.epoch, update.from_epoch_index, update.to_epoch_index
            );
            let dropped = self.discard_routes();
            return UpdateOutcome::NeedsSync(dropped);
        }

        if update.to_epoch_index <= self.epoch {
            trace!(
                "Ignoring stale route update up to epoch {} (at {})",
                update.to_epoch_index,
                self.epoch
            );
            return UpdateOutcome::Ignored;
        }

        let mut changed = Vec::new();
        for prefix in update.withdrawn_routes {
            if self.routes.remove(&prefix).is_some() {
                changed.push(prefix);
            }
        }
        for route in update.new_routes {
            let prefix = route.prefix.clone();
            match self.routes.get_mut(&prefix) {
                Some(entry) => {
                    // Only a changed path affects selection; a re-advertise
                    // just refreshes the entry.
                    if entry.route.path != route.path {
                        changed.push(prefix);
                    }
                    entry.route = route;
                    entry.refreshed_at = now;
                }
                None => {
                    self.routes.insert(
                        prefix.clone(),
                        RouteEntry {
                            route,
                            refreshed_at: now,
                        },
                    );
                    changed.push(prefix);
                }
            }
        }

        self.epoch = update.to_epoch_index;
        UpdateOutcome::Applied(changed)
    }

    /// Withdraws routes the peer has not refreshed within `max_age`.
    pub fn expire_older_than(&mut self, max_age: Duration, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .routes
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.refreshed_at) > max_age)
            .map(|(prefix, _)| prefix.clone())
            .collect();
        for prefix in &expired {
            self.routes.remove(prefix);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;

    fn update(from: u32, to: u32) -> RouteUpdateRequest {
        let mut update = UPDATE_REQUEST_COMPLEX.clone();
        update.from_epoch_index = from;
        update.to_epoch_index = to;
        update
    }

    #[test]
    fn applies_contiguous_updates() {
        let mut table = PeerRoutes::default();
        let outcome = table.handle_update(update(0, 1), Instant::now());
        match outcome {
            UpdateOutcome::Applied(changed) => {
                let mut changed = changed;
                changed.sort();
                assert_eq!(
                    changed,
                    vec!["example.prefix1".to_string(), "example.prefix2".to_string()]
                );
            }
            _ => panic!("expected update to apply"),
        }
        assert_eq!(table.epoch(), 1);
        assert!(table.route_for("example.prefix1").is_some());
    }

    #[test]
    fn ignores_stale_and_heartbeat_updates() {
        let mut table = PeerRoutes::default();
        table.handle_update(update(0, 2), Instant::now());
        assert!(matches!(
            table.handle_update(update(0, 1), Instant::now()),
            UpdateOutcome::Ignored
        ));
        let mut heartbeat = UPDATE_REQUEST_HEARTBEAT.clone();
        heartbeat.from_epoch_index = 2;
        heartbeat.to_epoch_index = 2;
        assert!(matches!(
            table.handle_update(heartbeat, Instant::now()),
            UpdateOutcome::Ignored
        ));
    }

    #[test]
    fn epoch_gap_discards_state() {
        let mut table = PeerRoutes::default();
        table.handle_update(update(0, 2), Instant::now());
        let outcome = table.handle_update(update(5, 6), Instant::now());
        match outcome {
            UpdateOutcome::NeedsSync(mut dropped) => {
                dropped.sort();
                assert_eq!(
                    dropped,
                    vec!["example.prefix1".to_string(), "example.prefix2".to_string()]
                );
            }
            _ => panic!("expected a resync"),
        }
        assert_eq!(table.epoch(), 0);
        assert!(table.route_for("example.prefix1").is_none());
    }

    #[test]
    fn table_id_change_discards_state() {
        let mut table = PeerRoutes::default();
        table.handle_update(update(0, 2), Instant::now());
        let mut from_new_table = update(0, 1);
        from_new_table.routing_table_id = [7; 16];
        assert!(matches!(
            table.handle_update(from_new_table, Instant::now()),
            UpdateOutcome::NeedsSync(_)
        ));
        assert_eq!(table.routing_table_id(), Some([7; 16]));
        assert_eq!(table.epoch(), 0);
    }

    #[test]
    fn withdrawals_remove_routes() {
        let mut table = PeerRoutes::default();
        table.handle_update(update(0, 1), Instant::now());
        let mut withdrawal = UPDATE_REQUEST_HEARTBEAT.clone();
        withdrawal.from_epoch_index = 1;
        withdrawal.to_epoch_index = 2;
        withdrawal.withdrawn_routes = vec!["example.prefix1".to_string()];
        match table.handle_update(withdrawal, Instant::now()) {
            UpdateOutcome::Applied(changed) => {
                assert_eq!(changed, vec!["example.prefix1".to_string()])
            }
            _ => panic!("expected update to apply"),
        }
        assert!(table.route_for("example.prefix1").is_none());
        assert!(table.route_for("example.prefix2").is_some());
    }

    #[test]
    fn expires_unrefreshed_routes() {
        let mut table = PeerRoutes::default();
        let start = Instant::now();
        table.handle_update(update(0, 1), start);

        // prefix1 is refreshed later; prefix2 is left to go stale.
        let mut refresh = UPDATE_REQUEST_HEARTBEAT.clone();
        refresh.from_epoch_index = 1;
        refresh.to_epoch_index = 2;
        refresh.new_routes = vec![UPDATE_REQUEST_COMPLEX.new_routes[0].clone()];
        let later = start + Duration::from_secs(40);
        table.handle_update(refresh, later);

        let mut expired = table.expire_older_than(Duration::from_secs(45), later + Duration::from_secs(10));
        expired.sort();
        assert_eq!(expired, vec!["example.prefix2".to_string()]);
        assert!(table.route_for("example.prefix1").is_some());
    }
}
