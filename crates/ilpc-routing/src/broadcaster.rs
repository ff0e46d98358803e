//! Route broadcaster: owns the routing peers, picks the best route per
//! prefix, and keeps the local and forwarding tables in step.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use ilpc_core::ccp::{RouteControlRequest, RouteUpdateRequest};
use ilpc_core::config::StaticRoute;
use ilpc_core::hashing::{chain_auth, route_auth};
use ilpc_core::{Accounts, ConnectorConfig, CoreError, PluginEvent, Relation};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::dragon::can_dragon_filter;
use crate::error::RoutingError;
use crate::peer::{Peer, PeerStatus, SenderTiming};
use crate::route::{compare_routes, Route, RouteUpdate};
use crate::routing_table::{ForwardingRoutingTable, RoutingTable};

/// Broadcaster settings derived from the connector config.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub global_prefix: String,
    /// Account id, or `auto` for the first parent.
    pub default_route: Option<String>,
    pub static_routes: Vec<StaticRoute>,
    pub broadcast_enabled: bool,
    pub timing: SenderTiming,
    pub routing_secret: [u8; 32],
}

impl BroadcasterConfig {
    pub fn from_connector_config(config: &ConnectorConfig) -> Result<Self, CoreError> {
        let routing_secret = config.routing_secret_bytes()?;
        if config.routing_secret.is_some() {
            tracing::info!("loaded routing secret from config");
        } else {
            tracing::info!("generated random routing secret");
        }
        Ok(Self {
            global_prefix: config.global_prefix().to_string(),
            default_route: config.default_route.clone(),
            static_routes: config.routes.clone(),
            broadcast_enabled: config.route_broadcast_enabled,
            timing: SenderTiming {
                route_expiry: Duration::from_millis(config.route_expiry_ms),
                broadcast_interval: Duration::from_millis(config.route_broadcast_interval_ms),
            },
            routing_secret,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcasterStatus {
    pub routing_table_id: Uuid,
    pub current_epoch: u32,
    pub local_routing_table: BTreeMap<String, Route>,
    pub forwarding_routing_table: BTreeMap<String, Option<Route>>,
    pub routing_log: Vec<RouteUpdate>,
    pub peers: BTreeMap<String, PeerStatus>,
}

#[derive(Default)]
struct BroadcasterState {
    peers: HashMap<String, Peer>,
    local_routes: HashMap<String, Route>,
}

pub struct RouteBroadcaster {
    config: BroadcasterConfig,
    accounts: Arc<Accounts>,
    routing_table: Arc<RoutingTable>,
    forwarding_table: Arc<ForwardingRoutingTable>,
    state: Mutex<BroadcasterState>,
    subscriptions: DashMap<String, JoinHandle<()>>,
}

impl RouteBroadcaster {
    pub fn new(
        config: BroadcasterConfig,
        accounts: Arc<Accounts>,
        routing_table: Arc<RoutingTable>,
        forwarding_table: Arc<ForwardingRoutingTable>,
    ) -> Self {
        Self {
            config,
            accounts,
            routing_table,
            forwarding_table,
            state: Mutex::new(BroadcasterState::default()),
            subscriptions: DashMap::new(),
        }
    }

    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.routing_table
    }

    pub fn forwarding_table(&self) -> &Arc<ForwardingRoutingTable> {
        &self.forwarding_table
    }

    pub fn global_prefix(&self) -> &str {
        &self.config.global_prefix
    }

    /// Install local routes and start tracking every account.
    pub fn start(self: &Arc<Self>) {
        self.reload_local_routes();
        for account_id in self.accounts.account_ids() {
            self.track(&account_id);
        }
    }

    /// Drop every peer and stop following plugin events.
    pub fn stop(&self) {
        let peer_ids: Vec<String> = self.state.lock().peers.keys().cloned().collect();
        for account_id in peer_ids {
            self.remove(&account_id);
        }
        let tracked: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        for account_id in tracked {
            if let Some((_, task)) = self.subscriptions.remove(&account_id) {
                task.abort();
            }
        }
    }

    /// Follow an account's connect/disconnect events. Idempotent.
    pub fn track(self: &Arc<Self>, account_id: &str) {
        if self.subscriptions.contains_key(account_id) {
            return;
        }
        let plugin = match self.accounts.plugin(account_id) {
            Ok(plugin) => plugin,
            Err(e) => {
                tracing::warn!(account_id = %account_id, error = %e, "cannot track unknown account");
                return;
            }
        };
        let mut events = plugin.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        let id = account_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(account_id = %id, skipped, "missed plugin events");
                        continue;
                    }
                    Err(RecvError::Closed) => return,
                };
                let Some(this) = weak.upgrade() else {
                    return;
                };
                match event {
                    PluginEvent::Connect => this.add(&id),
                    PluginEvent::Disconnect => this.remove(&id),
                }
            }
        });
        self.subscriptions.insert(account_id.to_string(), task);
        self.add(account_id);
    }

    /// Stop following an account and drop its peer.
    pub fn untrack(&self, account_id: &str) {
        self.remove(account_id);
        if let Some((_, task)) = self.subscriptions.remove(account_id) {
            task.abort();
        }
    }

    /// Create a routing peer for a connected account, or nudge an existing
    /// one to resync.
    pub fn add(&self, account_id: &str) {
        let info = match self.accounts.info(account_id) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(account_id = %account_id, error = %e, "cannot add unknown account as peer");
                return;
            }
        };
        let send_routes = info.sends_routes();
        let receive_routes = info.receives_routes();
        if !send_routes && !receive_routes {
            tracing::warn!(
                account_id = %account_id,
                "not sending/receiving routes for peer, set send_routes/receive_routes to override"
            );
            return;
        }

        let mut state = self.state.lock();
        if let Some(existing) = state.peers.get(account_id) {
            match existing.receiver() {
                Some(receiver) => receiver.send_route_control(),
                None => tracing::warn!(
                    account_id = %account_id,
                    "unable to send route control message, receiver not configured"
                ),
            }
            return;
        }

        let plugin = match self.accounts.plugin(account_id) {
            Ok(plugin) => plugin,
            Err(_) => return,
        };
        if !plugin.is_connected() {
            return;
        }

        tracing::trace!(account_id = %account_id, send_routes, receive_routes, "add peer");
        let peer = Peer::new(
            account_id,
            plugin,
            send_routes,
            receive_routes,
            self.forwarding_table.clone(),
            self.accounts.clone(),
            self.config.timing,
        );
        if let Some(receiver) = peer.receiver() {
            receiver.send_route_control();
        }
        state.peers.insert(account_id.to_string(), peer);
        self.reload_local_routes_locked(&mut state);
    }

    /// Drop the routing peer for an account and recompute the prefixes it
    /// was serving.
    pub fn remove(&self, account_id: &str) {
        let mut state = self.state.lock();
        let Some(peer) = state.peers.remove(account_id) else {
            return;
        };
        tracing::trace!(account_id = %account_id, "remove peer");
        peer.stop();

        if let Some(receiver) = peer.receiver() {
            for prefix in receiver.prefixes() {
                self.update_prefix_locked(&state, &prefix);
            }
        }
        if self.accounts.relation(account_id) == Relation::Child {
            if let Ok(child_address) = self.accounts.child_address(account_id) {
                self.update_prefix_locked(&state, &child_address);
            }
        }
    }

    pub fn handle_route_control(
        &self,
        source: &str,
        control: &RouteControlRequest,
    ) -> Result<(), RoutingError> {
        let state = self.state.lock();
        let peer = state.peers.get(source).ok_or_else(|| {
            tracing::debug!(source = %source, "received route control message from non-peer");
            RoutingError::ControlFromNonPeer {
                account: source.to_string(),
            }
        })?;
        let sender = peer.sender().ok_or_else(|| {
            tracing::debug!(
                source = %source,
                "received route control message from peer not authorized to receive routes from us"
            );
            RoutingError::SendRoutesDisabled {
                account: source.to_string(),
            }
        })?;
        sender.handle_route_control(control);
        Ok(())
    }

    pub fn handle_route_update(
        &self,
        source: &str,
        update: &RouteUpdateRequest,
    ) -> Result<(), RoutingError> {
        let state = self.state.lock();
        let peer = state.peers.get(source).ok_or_else(|| {
            tracing::debug!(source = %source, "received route update from non-peer");
            RoutingError::UpdateFromNonPeer {
                account: source.to_string(),
            }
        })?;
        let receiver = peer.receiver().ok_or_else(|| {
            tracing::debug!(
                source = %source,
                "received route update from peer not authorized to advertise routes to us"
            );
            RoutingError::ReceiveRoutesDisabled {
                account: source.to_string(),
            }
        })?;

        let global_prefix = &self.config.global_prefix;
        let own_address = self.accounts.own_address();
        let mut filtered = update.clone();
        filtered.new_routes.retain(|route| {
            route.prefix.starts_with(global_prefix.as_str())
                && route.prefix.len() > global_prefix.len()
                && !route.path.contains(&own_address)
        });

        let changed_prefixes = receiver.handle_route_update(&filtered);
        let mut routes_changed = false;
        for prefix in &changed_prefixes {
            routes_changed |= self.update_prefix_locked(&state, prefix);
        }

        if routes_changed && self.config.broadcast_enabled {
            for peer in state.peers.values() {
                if let Some(sender) = peer.sender() {
                    sender.schedule_route_update();
                }
            }
        }
        Ok(())
    }

    /// Rebuild our own routes: the own address, the default route, and one
    /// route per child; then re-evaluate them and every static route.
    pub fn reload_local_routes(&self) {
        let mut state = self.state.lock();
        self.reload_local_routes_locked(&mut state);
    }

    fn reload_local_routes_locked(&self, state: &mut BroadcasterState) {
        tracing::trace!("reload local and configured routes");
        let secret = &self.config.routing_secret;
        let account_ids = self.accounts.account_ids();
        let own_address = self.accounts.own_address();

        let mut local_routes = HashMap::new();
        local_routes.insert(
            own_address.clone(),
            Route::local(route_auth(secret, &own_address)),
        );

        let default_route = match self.config.default_route.as_deref() {
            Some("auto") => self.accounts.parent_ids().into_iter().next(),
            other => other.map(str::to_string),
        };
        if let Some(next_hop) = default_route {
            let global_prefix = &self.config.global_prefix;
            local_routes.insert(
                global_prefix.clone(),
                Route::new(next_hop, Vec::new(), route_auth(secret, global_prefix)),
            );
        }

        for account_id in &account_ids {
            if self.accounts.relation(account_id) != Relation::Child {
                continue;
            }
            if let Ok(child_address) = self.accounts.child_address(account_id) {
                let auth = route_auth(secret, &child_address);
                local_routes.insert(child_address, Route::new(account_id.clone(), Vec::new(), auth));
            }
        }

        state.local_routes = local_routes;
        let mut prefixes: Vec<String> = state.local_routes.keys().cloned().collect();
        prefixes.sort();
        prefixes.extend(self.config.static_routes.iter().map(|r| r.target_prefix.clone()));
        for prefix in prefixes {
            self.update_prefix_locked(state, &prefix);
        }
    }

    /// Best route for a prefix: a static route, else a local route, else
    /// the best route learned from a peer.
    pub fn get_best_peer_for_prefix(&self, prefix: &str) -> Option<Route> {
        let state = self.state.lock();
        self.best_route_locked(&state, prefix)
    }

    fn best_route_locked(&self, state: &BroadcasterState, prefix: &str) -> Option<Route> {
        if let Some(configured) = self
            .config
            .static_routes
            .iter()
            .find(|r| r.target_prefix == prefix)
        {
            if self.accounts.exists(&configured.peer_id) {
                return Some(Route::new(
                    configured.peer_id.clone(),
                    Vec::new(),
                    route_auth(&self.config.routing_secret, prefix),
                ));
            }
            tracing::warn!(
                prefix = %configured.target_prefix,
                account_id = %configured.peer_id,
                "ignoring configured route, account does not exist"
            );
        }

        if let Some(local) = state.local_routes.get(prefix) {
            return Some(local.clone());
        }

        state
            .peers
            .values()
            .filter_map(|peer| peer.receiver().and_then(|r| r.get_prefix(prefix)))
            .min_by(|a, b| compare_routes(a, b, |id| self.accounts.relation(id)))
    }

    /// Recompute the best route for a prefix. Returns whether it changed.
    pub fn update_prefix(&self, prefix: &str) -> bool {
        let state = self.state.lock();
        self.update_prefix_locked(&state, prefix)
    }

    fn update_prefix_locked(&self, state: &BroadcasterState, prefix: &str) -> bool {
        let new_best = self.best_route_locked(state, prefix);
        let current_best = self.routing_table.get(prefix);
        let current_next_hop = current_best.as_ref().map(|r| r.next_hop.as_str());
        let new_next_hop = new_best.as_ref().map(|r| r.next_hop.as_str());
        if current_next_hop == new_next_hop {
            return false;
        }

        match &new_best {
            Some(route) => {
                tracing::trace!(
                    prefix = %prefix,
                    old_best = ?current_next_hop,
                    new_best = %route.next_hop,
                    "new best route for prefix"
                );
                self.routing_table.insert(prefix, route.clone());
            }
            None => {
                tracing::trace!(prefix = %prefix, "no more route available for prefix");
                self.routing_table.delete(prefix);
            }
        }
        self.update_forwarding_route(prefix, new_best);
        true
    }

    /// Publish the advertised form of a route, or a withdrawal if it must
    /// not be advertised.
    fn update_forwarding_route(&self, prefix: &str, route: Option<Route>) {
        let own_address = self.accounts.own_address();
        let global_prefix = self.config.global_prefix.as_str();

        let advertised = route.and_then(|route| {
            let mut path = Vec::with_capacity(route.path.len() + 1);
            path.push(own_address.clone());
            path.extend(route.path);
            let advertised = Route::new(route.next_hop, path, chain_auth(&route.auth));

            let outside_namespace = !prefix.starts_with(global_prefix);
            let is_global = prefix == global_prefix;
            let own_child = prefix.starts_with(&format!("{}.", own_address)) && advertised.path.len() == 1;
            let filtered = outside_namespace
                || is_global
                || own_child
                || can_dragon_filter(&self.forwarding_table, |id| self.accounts.relation(id), prefix, &advertised);
            (!filtered).then_some(advertised)
        });
        let has_route = advertised.is_some();

        if self.forwarding_table.publish(prefix, advertised).is_none() || !has_route {
            return;
        }

        // a new less specific route may make more specific ones redundant
        for sub_prefix in self.forwarding_table.keys_starting_with(prefix) {
            if sub_prefix == prefix {
                continue;
            }
            let advertised = self
                .forwarding_table
                .get(&sub_prefix)
                .map_or(false, |u| u.route.is_some());
            if !advertised {
                continue;
            }
            if let Some(best) = self.routing_table.get(&sub_prefix) {
                self.update_forwarding_route(&sub_prefix, Some(best));
            }
        }
    }

    pub fn status(&self) -> BroadcasterStatus {
        let state = self.state.lock();
        BroadcasterStatus {
            routing_table_id: self.forwarding_table.routing_table_id(),
            current_epoch: self.forwarding_table.current_epoch(),
            local_routing_table: self.routing_table.snapshot(),
            forwarding_routing_table: self.forwarding_table.snapshot(),
            routing_log: self.forwarding_table.live_log(),
            peers: state
                .peers
                .iter()
                .map(|(id, peer)| (id.clone(), peer.status()))
                .collect(),
        }
    }

    /// Ids of accounts that currently have a routing peer.
    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().peers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for RouteBroadcaster {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::FutureExt;
    use ilpc_core::ccp::{ccp_response, CcpRoute, Mode};
    use ilpc_core::{AccountInfo, IlpError, MemoryPlugin, Plugin};

    struct Fixture {
        broadcaster: Arc<RouteBroadcaster>,
        accounts: Arc<Accounts>,
        _remotes: Vec<MemoryPlugin>,
    }

    fn config() -> BroadcasterConfig {
        BroadcasterConfig {
            global_prefix: "test".into(),
            default_route: None,
            static_routes: Vec::new(),
            broadcast_enabled: true,
            timing: SenderTiming {
                route_expiry: Duration::from_secs(45),
                broadcast_interval: Duration::from_secs(30),
            },
            routing_secret: [9; 32],
        }
    }

    async fn fixture(config: BroadcasterConfig, accounts_spec: &[(&str, Relation)]) -> Fixture {
        fixture_at("test.me", config, accounts_spec).await
    }

    async fn fixture_at(address: &str, config: BroadcasterConfig, accounts_spec: &[(&str, Relation)]) -> Fixture {
        let accounts = Arc::new(Accounts::new(Some(address.into())));
        let mut remotes = Vec::new();
        for (id, relation) in accounts_spec {
            let (ours, theirs) = MemoryPlugin::pair();
            theirs.connect().await.unwrap();
            theirs
                .register_data_handler(Arc::new(|_: Bytes| {
                    async { Ok::<_, IlpError>(ccp_response()) }.boxed()
                }))
                .unwrap();
            ours.connect().await.unwrap();
            accounts
                .add(id, AccountInfo::new(*relation, "USD", 2), Arc::new(ours))
                .unwrap();
            remotes.push(theirs);
        }
        let broadcaster = Arc::new(RouteBroadcaster::new(
            config,
            accounts.clone(),
            Arc::new(RoutingTable::new()),
            Arc::new(ForwardingRoutingTable::new()),
        ));
        Fixture {
            broadcaster,
            accounts,
            _remotes: remotes,
        }
    }

    fn update(prefixes: &[&str], path: &[&str]) -> RouteUpdateRequest {
        RouteUpdateRequest {
            routing_table_id: Uuid::from_u128(42),
            current_epoch_index: 1,
            from_epoch_index: 0,
            to_epoch_index: 1,
            hold_down_time: 45_000,
            speaker: "test.remote".into(),
            new_routes: prefixes
                .iter()
                .map(|p| CcpRoute {
                    prefix: p.to_string(),
                    path: path.iter().map(|s| s.to_string()).collect(),
                    auth: [1; 32],
                    props: Vec::new(),
                })
                .collect(),
            withdrawn_routes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_start_installs_local_and_child_routes() {
        let f = fixture(config(), &[("kid", Relation::Child), ("bob", Relation::Peer)]).await;
        f.broadcaster.start();

        let table = f.broadcaster.routing_table();
        assert_eq!(table.get("test.me").unwrap().next_hop, "");
        assert_eq!(table.get("test.me.kid").unwrap().next_hop, "kid");
        assert_eq!(f.broadcaster.peer_ids(), vec!["bob"]);

        // our own address is advertised; our children (path length 1) are not
        let forwarding = f.broadcaster.forwarding_table().snapshot();
        let own = forwarding["test.me"].as_ref().unwrap();
        assert_eq!(own.path, vec!["test.me"]);
        assert!(forwarding.get("test.me.kid").is_none());
    }

    #[tokio::test]
    async fn test_reload_local_routes_without_parent() {
        let f = fixture_at("test.u1", config(), &[("u2", Relation::Peer), ("u5", Relation::Child)]).await;
        f.broadcaster.reload_local_routes();

        let table = f.broadcaster.routing_table();
        assert_eq!(table.get("test.u1").unwrap().next_hop, "");
        assert_eq!(table.get("test.u1.u5").unwrap().next_hop, "u5");
        assert!(table.get("test.u1.u2").is_none());
        assert_eq!(table.resolve("test.u1.u5.alice").unwrap().next_hop, "u5");
        assert!(table.resolve("test.u9").is_none());
    }

    #[tokio::test]
    async fn test_default_route_auto_picks_first_parent() {
        let mut cfg = config();
        cfg.default_route = Some("auto".into());
        let f = fixture(cfg, &[("up2", Relation::Parent), ("up1", Relation::Parent)]).await;
        f.broadcaster.start();
        assert_eq!(f.broadcaster.routing_table().resolve("test.anything").unwrap().next_hop, "up1");
        // the global prefix itself is never advertised
        assert!(f
            .broadcaster
            .forwarding_table()
            .get("test")
            .map_or(true, |u| u.route.is_none()));
    }

    #[tokio::test]
    async fn test_parent_outranks_peer() {
        let f = fixture(config(), &[("p", Relation::Parent), ("q", Relation::Peer)]).await;
        f.broadcaster.start();
        f.broadcaster
            .handle_route_update("q", &update(&["test.dest"], &["test.q"]))
            .unwrap();
        f.broadcaster
            .handle_route_update("p", &update(&["test.dest"], &["test.p", "test.x", "test.y"]))
            .unwrap();
        assert_eq!(f.broadcaster.routing_table().get("test.dest").unwrap().next_hop, "p");

        // advertised with our address prepended and the auth re-hashed
        let advertised = f.broadcaster.forwarding_table().get("test.dest").unwrap().route.unwrap();
        assert_eq!(advertised.path[0], "test.me");
        assert_eq!(advertised.auth, chain_auth(&[1; 32]));
    }

    #[tokio::test]
    async fn test_static_route_beats_learned() {
        let mut cfg = config();
        cfg.static_routes = vec![StaticRoute {
            target_prefix: "test.dest".into(),
            peer_id: "q".into(),
        }];
        let f = fixture(cfg, &[("p", Relation::Parent), ("q", Relation::Peer)]).await;
        f.broadcaster.start();
        f.broadcaster
            .handle_route_update("p", &update(&["test.dest"], &["test.p"]))
            .unwrap();
        assert_eq!(f.broadcaster.routing_table().get("test.dest").unwrap().next_hop, "q");
    }

    #[tokio::test]
    async fn test_static_route_to_missing_account_is_ignored() {
        let mut cfg = config();
        cfg.static_routes = vec![StaticRoute {
            target_prefix: "test.dest".into(),
            peer_id: "ghost".into(),
        }];
        let f = fixture(cfg, &[("q", Relation::Peer)]).await;
        f.broadcaster.start();
        assert!(f.broadcaster.routing_table().get("test.dest").is_none());
    }

    #[tokio::test]
    async fn test_update_filters_foreign_and_looping_routes() {
        let f = fixture(config(), &[("q", Relation::Peer)]).await;
        f.broadcaster.start();
        f.broadcaster
            .handle_route_update("q", &update(&["g.other", "test", "test.ok"], &["test.q"]))
            .unwrap();
        f.broadcaster
            .handle_route_update("q", &{
                let mut u = update(&["test.loop"], &["test.q", "test.me"]);
                u.from_epoch_index = 1;
                u.to_epoch_index = 2;
                u
            })
            .unwrap();
        let table = f.broadcaster.routing_table();
        assert!(table.get("g.other").is_none());
        assert!(table.get("test").is_none());
        assert!(table.get("test.loop").is_none());
        assert_eq!(table.get("test.ok").unwrap().next_hop, "q");
    }

    #[tokio::test]
    async fn test_messages_from_non_peers_are_bad_requests() {
        let f = fixture(config(), &[("kid", Relation::Child)]).await;
        f.broadcaster.start();
        let err = f
            .broadcaster
            .handle_route_update("kid", &update(&["test.x"], &["test.kid"]))
            .unwrap_err();
        assert!(matches!(err, RoutingError::UpdateFromNonPeer { .. }));
        let control = RouteControlRequest {
            mode: Mode::Sync,
            last_known_routing_table_id: Uuid::nil(),
            last_known_epoch: 0,
            features: Vec::new(),
        };
        assert!(matches!(
            f.broadcaster.handle_route_control("nobody", &control),
            Err(RoutingError::ControlFromNonPeer { .. })
        ));
    }

    #[tokio::test]
    async fn test_receive_only_peer_rejects_route_control() {
        let accounts = Arc::new(Accounts::new(Some("test.me".into())));
        let (ours, _theirs) = MemoryPlugin::pair();
        ours.connect().await.unwrap();
        let mut info = AccountInfo::new(Relation::Peer, "USD", 2);
        info.send_routes = Some(false);
        accounts.add("q", info, Arc::new(ours)).unwrap();
        let broadcaster = Arc::new(RouteBroadcaster::new(
            config(),
            accounts,
            Arc::new(RoutingTable::new()),
            Arc::new(ForwardingRoutingTable::new()),
        ));
        broadcaster.start();
        let control = RouteControlRequest {
            mode: Mode::Sync,
            last_known_routing_table_id: Uuid::nil(),
            last_known_epoch: 0,
            features: Vec::new(),
        };
        assert!(matches!(
            broadcaster.handle_route_control("q", &control),
            Err(RoutingError::SendRoutesDisabled { .. })
        ));
    }

    #[tokio::test]
    async fn test_removing_peer_withdraws_its_routes() {
        let f = fixture(config(), &[("q", Relation::Peer), ("r", Relation::Peer)]).await;
        f.broadcaster.start();
        f.broadcaster
            .handle_route_update("q", &update(&["test.dest"], &["test.q"]))
            .unwrap();
        f.broadcaster
            .handle_route_update("r", &update(&["test.dest"], &["test.r", "test.x"]))
            .unwrap();
        assert_eq!(f.broadcaster.routing_table().get("test.dest").unwrap().next_hop, "q");

        f.broadcaster.remove("q");
        assert_eq!(f.broadcaster.routing_table().get("test.dest").unwrap().next_hop, "r");
        f.broadcaster.remove("r");
        assert!(f.broadcaster.routing_table().get("test.dest").is_none());
        assert!(f.broadcaster.forwarding_table().get("test.dest").unwrap().route.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_event_removes_peer() {
        let f = fixture(config(), &[("q", Relation::Peer)]).await;
        f.broadcaster.start();
        assert_eq!(f.broadcaster.peer_ids(), vec!["q"]);

        let plugin = f.accounts.plugin("q").unwrap();
        plugin.disconnect().await.unwrap();
        for _ in 0..50 {
            if f.broadcaster.peer_ids().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(f.broadcaster.peer_ids().is_empty());

        plugin.connect().await.unwrap();
        for _ in 0..50 {
            if !f.broadcaster.peer_ids().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(f.broadcaster.peer_ids(), vec!["q"]);
    }

    #[tokio::test]
    async fn test_dragon_withdraws_redundant_more_specific_route() {
        let f = fixture(config(), &[("q", Relation::Peer)]).await;
        f.broadcaster.start();
        f.broadcaster
            .handle_route_update("q", &update(&["test.q.sub"], &["test.q"]))
            .unwrap();
        assert!(f.broadcaster.forwarding_table().get("test.q.sub").unwrap().route.is_some());

        let mut wider = update(&["test.q"], &["test.q"]);
        wider.from_epoch_index = 1;
        wider.to_epoch_index = 2;
        f.broadcaster.handle_route_update("q", &wider).unwrap();
        assert!(f.broadcaster.forwarding_table().get("test.q").unwrap().route.is_some());
        assert!(f.broadcaster.forwarding_table().get("test.q.sub").unwrap().route.is_none());
        // still routable locally
        assert_eq!(f.broadcaster.routing_table().get("test.q.sub").unwrap().next_hop, "q");
    }

    #[tokio::test]
    async fn test_status_reports_tables_and_peers() {
        let f = fixture(config(), &[("q", Relation::Peer)]).await;
        f.broadcaster.start();
        f.broadcaster
            .handle_route_update("q", &update(&["test.dest"], &["test.q"]))
            .unwrap();
        let status = f.broadcaster.status();
        assert_eq!(status.current_epoch, f.broadcaster.forwarding_table().current_epoch());
        assert!(status.local_routing_table.contains_key("test.dest"));
        assert_eq!(status.peers["q"].receive.as_ref().unwrap().epoch, 1);
        assert!(serde_json::to_string(&status).is_ok());
    }
}
