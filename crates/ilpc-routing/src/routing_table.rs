use std::collections::BTreeMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::prefix_map::PrefixMap;
use crate::route::{Route, RouteUpdate};

/// Best known route per prefix. Consulted for every forwarded packet.
pub struct RoutingTable {
    routes: RwLock<PrefixMap<Route>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(PrefixMap::new()),
        }
    }

    pub fn insert(&self, prefix: &str, route: Route) {
        self.routes.write().insert(prefix, route);
    }

    pub fn delete(&self, prefix: &str) {
        self.routes.write().delete(prefix);
    }

    pub fn get(&self, prefix: &str) -> Option<Route> {
        self.routes.read().get(prefix).cloned()
    }

    /// Longest-prefix match for a destination address.
    pub fn resolve(&self, address: &str) -> Option<Route> {
        self.routes.read().resolve(address).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.routes.read().keys()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Route> {
        self.routes
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

struct ForwardingState {
    entries: PrefixMap<RouteUpdate>,
    log: Vec<Option<RouteUpdate>>,
    current_epoch: u32,
}

/// Routes as advertised to peers, with the epoch-indexed change log that
/// CCP senders replay.
pub struct ForwardingRoutingTable {
    routing_table_id: Uuid,
    state: RwLock<ForwardingState>,
}

impl ForwardingRoutingTable {
    pub fn new() -> Self {
        Self {
            routing_table_id: Uuid::new_v4(),
            state: RwLock::new(ForwardingState {
                entries: PrefixMap::new(),
                log: Vec::new(),
                current_epoch: 0,
            }),
        }
    }

    pub fn routing_table_id(&self) -> Uuid {
        self.routing_table_id
    }

    /// Exclusive upper bound of the log.
    pub fn current_epoch(&self) -> u32 {
        self.state.read().current_epoch
    }

    pub fn get(&self, prefix: &str) -> Option<RouteUpdate> {
        self.state.read().entries.get(prefix).cloned()
    }

    pub fn keys_starting_with(&self, prefix: &str) -> Vec<String> {
        self.state.read().entries.keys_starting_with(prefix)
    }

    pub fn keys_prefixes_of(&self, address: &str) -> Vec<String> {
        self.state.read().entries.keys_prefixes_of(address)
    }

    /// Record `route` as the advertised route for `prefix` if its next hop
    /// differs from the current one. Returns the allocated epoch on change.
    pub fn publish(&self, prefix: &str, route: Option<Route>) -> Option<u32> {
        let mut state = self.state.write();
        let current = state.entries.get(prefix);
        let current_next_hop = current.and_then(|u| u.route.as_ref()).map(|r| r.next_hop.as_str());
        let new_next_hop = route.as_ref().map(|r| r.next_hop.as_str());
        if current_next_hop == new_next_hop {
            return None;
        }
        let superseded = current.map(|u| u.epoch);

        let epoch = state.current_epoch;
        state.current_epoch += 1;
        let update = RouteUpdate {
            prefix: prefix.to_string(),
            route,
            epoch,
        };
        tracing::trace!(prefix = %prefix, epoch, withdrawn = update.route.is_none(), "logging route update");
        state.entries.insert(prefix, update.clone());
        if let Some(old) = superseded {
            if let Some(slot) = state.log.get_mut(old as usize) {
                *slot = None;
            }
        }
        let index = epoch as usize;
        if state.log.len() <= index {
            state.log.resize(index + 1, None);
        }
        state.log[index] = Some(update);
        Some(epoch)
    }

    /// Up to `max` log slots starting at `from`. Nulled slots are kept.
    pub fn log_slice(&self, from: u32, max: usize) -> Vec<Option<RouteUpdate>> {
        let state = self.state.read();
        let start = (from as usize).min(state.log.len());
        let end = start.saturating_add(max).min(state.log.len());
        state.log[start..end].to_vec()
    }

    /// Non-null log entries in epoch order.
    pub fn live_log(&self) -> Vec<RouteUpdate> {
        self.state.read().log.iter().flatten().cloned().collect()
    }

    /// Advertised route per prefix; `None` marks a withdrawn prefix.
    pub fn snapshot(&self) -> BTreeMap<String, Option<Route>> {
        self.state
            .read()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.route.clone()))
            .collect()
    }
}

impl Default for ForwardingRoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
