use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ilpc_core::ccp::{Mode, RouteControlRequest, RouteUpdateRequest};
use ilpc_core::{PacketType, Plugin, Reject};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::RoutingError;
use crate::prefix_map::PrefixMap;
use crate::route::Route;

/// Delay before re-sending a route control message that failed.
pub const ROUTE_CONTROL_RETRY_INTERVAL: Duration = Duration::from_secs(30);

struct ReceiverState {
    routing_table_id: Uuid,
    epoch: u32,
    expiry: Option<DateTime<Utc>>,
    routes: PrefixMap<Route>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiverStatus {
    pub routing_table_id: Uuid,
    pub epoch: u32,
}

/// Inbound half of a CCP session: tracks which of a peer's routing table
/// epochs we have applied and the routes learned from it.
pub struct CcpReceiver {
    account_id: String,
    plugin: Arc<dyn Plugin>,
    state: Mutex<ReceiverState>,
    control_task: Mutex<Option<JoinHandle<()>>>,
}

impl CcpReceiver {
    pub fn new(account_id: impl Into<String>, plugin: Arc<dyn Plugin>) -> Self {
        Self {
            account_id: account_id.into(),
            plugin,
            state: Mutex::new(ReceiverState {
                routing_table_id: Uuid::nil(),
                epoch: 0,
                expiry: None,
                routes: PrefixMap::new(),
            }),
            control_task: Mutex::new(None),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn routing_table_id(&self) -> Uuid {
        self.state.lock().routing_table_id
    }

    pub fn epoch(&self) -> u32 {
        self.state.lock().epoch
    }

    /// Time until which the peer's routes are considered fresh.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expiry
    }

    pub fn get_prefix(&self, prefix: &str) -> Option<Route> {
        self.state.lock().routes.get(prefix).cloned()
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.state.lock().routes.keys()
    }

    pub fn status(&self) -> ReceiverStatus {
        let state = self.state.lock();
        ReceiverStatus {
            routing_table_id: state.routing_table_id,
            epoch: state.epoch,
        }
    }

    /// Apply a route update. Returns the prefixes whose routes changed.
    pub fn handle_route_update(&self, update: &RouteUpdateRequest) -> Vec<String> {
        let mut state = self.state.lock();

        let held_until = Utc::now() + chrono::Duration::milliseconds(update.hold_down_time as i64);
        state.expiry = Some(state.expiry.map_or(held_until, |e| e.max(held_until)));

        if state.routing_table_id != update.routing_table_id {
            tracing::trace!(
                account_id = %self.account_id,
                old_id = %state.routing_table_id,
                new_id = %update.routing_table_id,
                "saw new routing table"
            );
            state.routing_table_id = update.routing_table_id;
            state.epoch = 0;
        }

        if update.from_epoch_index > state.epoch {
            tracing::trace!(
                account_id = %self.account_id,
                expected_epoch = state.epoch,
                from_epoch = update.from_epoch_index,
                "gap in routing updates"
            );
            return Vec::new();
        }

        if state.epoch > update.to_epoch_index {
            tracing::trace!(
                account_id = %self.account_id,
                expected_epoch = state.epoch,
                to_epoch = update.to_epoch_index,
                "old routing update, ignoring"
            );
            return Vec::new();
        }

        if update.new_routes.is_empty() && update.withdrawn_routes.is_empty() {
            tracing::trace!(
                account_id = %self.account_id,
                from_epoch = update.from_epoch_index,
                to_epoch = update.to_epoch_index,
                "pure heartbeat"
            );
            state.epoch = update.to_epoch_index;
            return Vec::new();
        }

        let mut changed = Vec::new();
        for prefix in &update.withdrawn_routes {
            state.routes.delete(prefix);
            changed.push(prefix.clone());
        }
        for route in &update.new_routes {
            state.routes.insert(
                route.prefix.clone(),
                Route::new(self.account_id.clone(), route.path.clone(), route.auth),
            );
            changed.push(route.prefix.clone());
        }
        state.epoch = update.to_epoch_index;

        tracing::trace!(
            account_id = %self.account_id,
            changed = changed.len(),
            from_epoch = update.from_epoch_index,
            to_epoch = update.to_epoch_index,
            "applied route update"
        );
        changed
    }

    /// Ask the peer to stream us updates from our current epoch. Failures
    /// are retried every 30 seconds until the peer accepts or disconnects.
    pub fn send_route_control(self: &Arc<Self>) {
        if !self.plugin.is_connected() {
            tracing::debug!(
                account_id = %self.account_id,
                "cannot send route control message, plugin not connected (yet)"
            );
            return;
        }
        let weak = Arc::downgrade(self);
        let mut task = self.control_task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
        }
        *task = Some(tokio::spawn(route_control_loop(weak)));
    }

    /// Cancel any pending route control retry.
    pub fn stop(&self) {
        if let Some(task) = self.control_task.lock().take() {
            task.abort();
        }
    }

    fn route_control_request(&self) -> RouteControlRequest {
        let state = self.state.lock();
        RouteControlRequest {
            mode: Mode::Sync,
            last_known_routing_table_id: state.routing_table_id,
            last_known_epoch: state.epoch,
            features: Vec::new(),
        }
    }

    async fn try_route_control(&self) -> Result<(), RoutingError> {
        let request = self.route_control_request();
        let response = self.plugin.send_data(request.to_prepare_bytes()).await?;
        match PacketType::of(&response) {
            Some(PacketType::Fulfill) => {
                tracing::trace!(account_id = %self.account_id, "successfully sent route control message");
                Ok(())
            }
            Some(PacketType::Reject) => {
                let reject = Reject::from_bytes(&response)?;
                Err(RoutingError::Rejected {
                    code: reject.code,
                    message: reject.message,
                })
            }
            _ => Err(RoutingError::UnexpectedResponse(
                response.first().copied().unwrap_or_default(),
            )),
        }
    }
}

impl Drop for CcpReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn route_control_loop(receiver: Weak<CcpReceiver>) {
    loop {
        let Some(this) = receiver.upgrade() else {
            return;
        };
        if !this.plugin.is_connected() {
            tracing::debug!(
                account_id = %this.account_id,
                "cannot send route control message, plugin not connected (yet)"
            );
            return;
        }
        match this.try_route_control().await {
            Ok(()) => return,
            Err(e) => {
                tracing::debug!(
                    account_id = %this.account_id,
                    error = %e,
                    "failed to set route control information on peer"
                );
            }
        }
        drop(this);
        tokio::time::sleep(ROUTE_CONTROL_RETRY_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::FutureExt;
    use ilpc_core::ccp::{ccp_response, CcpRoute};
    use ilpc_core::{IlpError, MemoryPlugin, Prepare};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn update(from: u32, to: u32, new: &[&str], withdrawn: &[&str]) -> RouteUpdateRequest {
        RouteUpdateRequest {
            routing_table_id: Uuid::from_u128(7),
            current_epoch_index: to,
            from_epoch_index: from,
            to_epoch_index: to,
            hold_down_time: 45_000,
            speaker: "test.bob".into(),
            new_routes: new
                .iter()
                .map(|p| CcpRoute {
                    prefix: p.to_string(),
                    path: vec!["test.bob".into()],
                    auth: [1; 32],
                    props: Vec::new(),
                })
                .collect(),
            withdrawn_routes: withdrawn.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn receiver() -> CcpReceiver {
        CcpReceiver::new("bob", Arc::new(MemoryPlugin::pair().0))
    }

    #[test]
    fn test_initial_state() {
        let r = receiver();
        assert_eq!(r.routing_table_id(), Uuid::nil());
        assert_eq!(r.epoch(), 0);
        assert!(r.expiry().is_none());
    }

    #[test]
    fn test_applies_update_and_tags_peer() {
        let r = receiver();
        let changed = r.handle_route_update(&update(0, 3, &["test.bob", "test.bob.x"], &[]));
        assert_eq!(changed, vec!["test.bob", "test.bob.x"]);
        assert_eq!(r.epoch(), 3);
        assert_eq!(r.routing_table_id(), Uuid::from_u128(7));
        assert_eq!(r.get_prefix("test.bob").unwrap().next_hop, "bob");
        assert!(r.expiry().unwrap() > Utc::now());
    }

    #[test]
    fn test_gap_is_ignored() {
        let r = receiver();
        r.handle_route_update(&update(0, 3, &["test.bob"], &[]));
        let changed = r.handle_route_update(&update(5, 8, &["test.bob.y"], &[]));
        assert!(changed.is_empty());
        assert_eq!(r.epoch(), 3);
        assert!(r.get_prefix("test.bob.y").is_none());
    }

    #[test]
    fn test_stale_update_is_ignored() {
        let r = receiver();
        r.handle_route_update(&update(0, 5, &["test.bob"], &[]));
        assert!(r.handle_route_update(&update(0, 4, &[], &["test.bob"])).is_empty());
        assert!(r.get_prefix("test.bob").is_some());
    }

    #[test]
    fn test_heartbeat_advances_epoch_idempotently() {
        let r = receiver();
        r.handle_route_update(&update(0, 2, &["test.bob"], &[]));
        assert!(r.handle_route_update(&update(2, 4, &[], &[])).is_empty());
        assert_eq!(r.epoch(), 4);
        assert!(r.handle_route_update(&update(2, 4, &[], &[])).is_empty());
        assert_eq!(r.epoch(), 4);
        assert_eq!(r.prefixes(), vec!["test.bob"]);
    }

    #[test]
    fn test_new_table_id_resets_epoch() {
        let r = receiver();
        r.handle_route_update(&update(0, 9, &["test.bob"], &[]));
        let mut fresh = update(0, 1, &[], &["test.bob"]);
        fresh.routing_table_id = Uuid::from_u128(8);
        assert_eq!(r.handle_route_update(&fresh), vec!["test.bob"]);
        assert_eq!(r.epoch(), 1);
        assert!(r.prefixes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_control_retries_after_reject() {
        let (ours, theirs) = MemoryPlugin::pair();
        ours.connect().await.unwrap();
        theirs.connect().await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        theirs
            .register_data_handler(Arc::new(move |data: Bytes| {
                let seen = seen.clone();
                async move {
                    let prepare = Prepare::from_bytes(&data)?;
                    let control = RouteControlRequest::from_prepare(&prepare)?;
                    assert_eq!(control.mode, Mode::Sync);
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Ok(IlpError::internal("not yet").to_reject("test.bob").to_bytes());
                    }
                    Ok::<_, IlpError>(ccp_response())
                }
                .boxed()
            }))
            .unwrap();

        let receiver = Arc::new(CcpReceiver::new("bob", Arc::new(ours)));
        receiver.send_route_control();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(ROUTE_CONTROL_RETRY_INTERVAL).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        tokio::time::sleep(ROUTE_CONTROL_RETRY_INTERVAL * 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_retry() {
        let (ours, theirs) = MemoryPlugin::pair();
        ours.connect().await.unwrap();
        theirs.connect().await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        theirs
            .register_data_handler(Arc::new(move |_: Bytes| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Err::<Bytes, _>(IlpError::internal("down")) }.boxed()
            }))
            .unwrap();

        let receiver = Arc::new(CcpReceiver::new("bob", Arc::new(ours)));
        receiver.send_route_control();
        tokio::time::sleep(Duration::from_secs(1)).await;
        receiver.stop();
        tokio::time::sleep(ROUTE_CONTROL_RETRY_INTERVAL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnected_plugin_sends_nothing() {
        let r = Arc::new(receiver());
        // no runtime needed: nothing is spawned when disconnected
        r.send_route_control();
        assert!(r.control_task.lock().is_none());
    }
}
