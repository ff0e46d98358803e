use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ilpc_core::{ErrorCode, MiddlewareKind, PacketType, Reject};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::PipelineError;
use crate::pipeline::{Next, PipelineEntry, Pipelines};
use crate::traits::Middleware;

const MAX_BALANCE_MESSAGE: &str = "exceeded maximum balance.";

/// A repeated rejection worth an operator's attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: u64,
    pub account_id: String,
    pub triggered_by: String,
    pub message: String,
    pub count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct AlertState {
    alerts: BTreeMap<u64, Alert>,
}

impl AlertState {
    fn record(&mut self, next_id: &AtomicU64, account_id: &str, triggered_by: &str, message: &str) {
        let now = Utc::now();
        if let Some(existing) = self.alerts.values_mut().find(|a| {
            a.account_id == account_id && a.triggered_by == triggered_by && a.message == message
        }) {
            existing.count += 1;
            existing.updated_at = now;
            return;
        }
        let id = next_id.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(account_id, triggered_by, message, alert_id = id, "new alert");
        self.alerts.insert(
            id,
            Alert {
                id,
                account_id: account_id.to_string(),
                triggered_by: triggered_by.to_string(),
                message: message.to_string(),
                count: 1,
                created_at: now,
                updated_at: now,
            },
        );
    }
}

/// Watches outgoing rejects for peers that refuse our packets because
/// we owe them too much.
pub struct AlertMiddleware {
    state: Arc<Mutex<AlertState>>,
    next_id: Arc<AtomicU64>,
}

impl Default for AlertMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertMiddleware {
    pub fn new() -> Self {
        let start = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        Self {
            state: Arc::new(Mutex::new(AlertState::default())),
            next_id: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Current alerts ordered by id.
    pub fn alerts(&self) -> Vec<Alert> {
        self.state.lock().alerts.values().cloned().collect()
    }

    /// Returns whether an alert with that id existed.
    pub fn dismiss(&self, id: u64) -> bool {
        self.state.lock().alerts.remove(&id).is_some()
    }
}

impl Middleware for AlertMiddleware {
    fn apply(&self, account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError> {
        let state = self.state.clone();
        let next_id = self.next_id.clone();
        let id = account_id.to_string();
        pipelines.outgoing_data.insert_last(PipelineEntry::new(
            MiddlewareKind::Alert.name(),
            move |data: Bytes, next: Next<Bytes, Bytes>| {
                let state = state.clone();
                let next_id = next_id.clone();
                let id = id.clone();
                async move {
                    let result = next.run(data).await?;
                    if PacketType::of(&result) == Some(PacketType::Reject) {
                        if let Ok(reject) = Reject::from_bytes(&result) {
                            if reject.code == ErrorCode::T04InsufficientLiquidity
                                && reject.message == MAX_BALANCE_MESSAGE
                            {
                                state
                                    .lock()
                                    .record(&next_id, &id, &reject.triggered_by, &reject.message);
                            }
                        }
                    }
                    Ok(result)
                }
            },
        ));
        Ok(())
    }
}
