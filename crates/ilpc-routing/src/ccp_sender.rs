use std::sync::Arc;
use std::time::Duration;

use ilpc_core::ccp::{CcpRoute, Mode, RouteControlRequest, RouteUpdateRequest};
use ilpc_core::{Accounts, PacketType, Plugin, Reject, Relation};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::RoutingError;
use crate::route::RouteUpdate;
use crate::routing_table::ForwardingRoutingTable;

/// Floor on the delay between two route updates to the same peer.
pub const MINIMUM_UPDATE_INTERVAL: Duration = Duration::from_millis(150);

/// Most log epochs carried by a single route update.
pub const MAX_EPOCHS_PER_UPDATE: usize = 50;

struct SenderState {
    mode: Mode,
    last_known_epoch: u32,
    last_update: Option<Instant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SenderStatus {
    pub epoch: u32,
    pub mode: Mode,
}

/// Outbound half of a CCP session: replays our forwarding log to a peer
/// that asked for it with a SYNC route control.
pub struct CcpSender {
    account_id: String,
    plugin: Arc<dyn Plugin>,
    table: Arc<ForwardingRoutingTable>,
    accounts: Arc<Accounts>,
    route_expiry: Duration,
    broadcast_interval: Duration,
    state: Mutex<SenderState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl CcpSender {
    pub fn new(
        account_id: impl Into<String>,
        plugin: Arc<dyn Plugin>,
        table: Arc<ForwardingRoutingTable>,
        accounts: Arc<Accounts>,
        route_expiry: Duration,
        broadcast_interval: Duration,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            plugin,
            table,
            accounts,
            route_expiry,
            broadcast_interval,
            state: Mutex::new(SenderState {
                mode: Mode::Idle,
                last_known_epoch: 0,
                last_update: None,
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    pub fn last_known_epoch(&self) -> u32 {
        self.state.lock().last_known_epoch
    }

    pub fn status(&self) -> SenderStatus {
        let state = self.state.lock();
        SenderStatus {
            epoch: state.last_known_epoch,
            mode: state.mode,
        }
    }

    pub fn handle_route_control(self: &Arc<Self>, control: &RouteControlRequest) {
        let mode = {
            let mut state = self.state.lock();
            if state.mode != control.mode {
                tracing::trace!(
                    account_id = %self.account_id,
                    old_mode = %state.mode,
                    new_mode = %control.mode,
                    "peer requested changing routing mode"
                );
            }
            state.mode = control.mode;
            if control.last_known_routing_table_id != self.table.routing_table_id() {
                tracing::trace!(
                    account_id = %self.account_id,
                    their_table_id = %control.last_known_routing_table_id,
                    "peer has old routing table id, resetting last known epoch to zero"
                );
                state.last_known_epoch = 0;
            } else {
                tracing::trace!(
                    account_id = %self.account_id,
                    epoch = control.last_known_epoch,
                    current_epoch = self.table.current_epoch(),
                    "peer epoch set"
                );
                state.last_known_epoch = control.last_known_epoch;
            }
            state.mode
        };

        match mode {
            Mode::Sync => self.schedule_route_update(),
            Mode::Idle => self.stop(),
        }
    }

    /// Arm the update timer: immediately (after the minimum interval) if
    /// the peer is behind, otherwise one broadcast interval after the last
    /// update.
    pub fn schedule_route_update(self: &Arc<Self>) {
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let (mode, last_known_epoch, last_update) = {
            let state = self.state.lock();
            (state.mode, state.last_known_epoch, state.last_update)
        };
        if mode != Mode::Sync {
            return;
        }

        let current_epoch = self.table.current_epoch();
        let delay = if last_known_epoch < current_epoch {
            Duration::ZERO
        } else {
            match last_update {
                Some(at) => self.broadcast_interval.saturating_sub(at.elapsed()),
                None => Duration::ZERO,
            }
        }
        .max(MINIMUM_UPDATE_INTERVAL);

        tracing::trace!(
            account_id = %self.account_id,
            delay_ms = delay.as_millis() as u64,
            current_epoch,
            peer_has_epoch = last_known_epoch,
            "scheduling next route update"
        );

        let weak = Arc::downgrade(self);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            // Only the sleep above is abortable. Once the epoch has been
            // advanced the send must run to completion or roll it back.
            tokio::spawn(async move {
                match this.send_single_route_update().await {
                    Ok(()) => this.schedule_route_update(),
                    Err(e) => {
                        tracing::debug!(
                            account_id = %this.account_id,
                            error = %e,
                            "failed to broadcast route information to peer"
                        );
                    }
                }
            });
        }));
    }

    /// Send the next slice of the forwarding log. On failure the peer's
    /// epoch is rolled back so the same slice is retried later.
    pub async fn send_single_route_update(&self) -> Result<(), RoutingError> {
        self.state.lock().last_update = Some(Instant::now());
        if !self.plugin.is_connected() {
            tracing::debug!(
                account_id = %self.account_id,
                "cannot send routes, plugin not connected (yet)"
            );
            return Ok(());
        }

        let (request, previous_epoch) = {
            let mut state = self.state.lock();
            let from_epoch = state.last_known_epoch;
            let slice = self.table.log_slice(from_epoch, MAX_EPOCHS_PER_UPDATE);
            let to_epoch = from_epoch + slice.len() as u32;
            let peer_relation = self.accounts.relation(&self.account_id);

            let mut new_routes = Vec::new();
            let mut withdrawn_routes = Vec::new();
            for update in slice.into_iter().flatten() {
                match self.redact(update, peer_relation) {
                    RouteUpdate {
                        prefix,
                        route: Some(route),
                        ..
                    } => new_routes.push(CcpRoute {
                        prefix,
                        path: route.path,
                        auth: route.auth,
                        props: Vec::new(),
                    }),
                    RouteUpdate { prefix, .. } => withdrawn_routes.push(prefix),
                }
            }

            let request = RouteUpdateRequest {
                routing_table_id: self.table.routing_table_id(),
                current_epoch_index: self.table.current_epoch(),
                from_epoch_index: from_epoch,
                to_epoch_index: to_epoch,
                hold_down_time: self.route_expiry.as_millis() as u32,
                speaker: self.accounts.own_address(),
                new_routes,
                withdrawn_routes,
            };
            tracing::trace!(
                account_id = %self.account_id,
                speaker = %request.speaker,
                from_epoch,
                to_epoch,
                route_count = request.new_routes.len(),
                unreachable_count = request.withdrawn_routes.len(),
                "broadcasting routes to peer"
            );
            state.last_known_epoch = to_epoch;
            (request, from_epoch)
        };

        let result = match tokio::time::timeout(
            self.broadcast_interval,
            self.plugin.send_data(request.to_prepare_bytes()),
        )
        .await
        {
            Err(_) => Err(RoutingError::Timeout),
            Ok(Err(e)) => Err(RoutingError::Transport(e)),
            Ok(Ok(response)) => match PacketType::of(&response) {
                Some(PacketType::Fulfill) => Ok(()),
                Some(PacketType::Reject) => match Reject::from_bytes(&response) {
                    Ok(reject) => Err(RoutingError::Rejected {
                        code: reject.code,
                        message: reject.message,
                    }),
                    Err(e) => Err(e.into()),
                },
                _ => Err(RoutingError::UnexpectedResponse(
                    response.first().copied().unwrap_or_default(),
                )),
            },
        };

        if result.is_err() {
            self.state.lock().last_known_epoch = previous_epoch;
        }
        result
    }

    /// Turn a route into a withdrawal if this peer must not learn it: the
    /// peer is the next hop, or the peer is a parent and the route leads
    /// through another parent or peer.
    fn redact(&self, update: RouteUpdate, peer_relation: Relation) -> RouteUpdate {
        let Some(route) = &update.route else {
            return update;
        };
        let through_peer = route.next_hop == self.account_id;
        let upstream_to_parent = peer_relation == Relation::Parent
            && matches!(
                self.accounts.relation(&route.next_hop),
                Relation::Parent | Relation::Peer
            );
        if through_peer || upstream_to_parent {
            RouteUpdate {
                route: None,
                ..update
            }
        } else {
            update
        }
    }

    /// Cancel the pending update timer.
    pub fn stop(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

impl Drop for CcpSender {
    fn drop(&mut self) {
        self.stop();
    }
}
