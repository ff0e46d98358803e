use std::sync::Arc;
use std::time::Duration;

use ilpc_core::{Accounts, Plugin};
use serde::Serialize;

use crate::ccp_receiver::{CcpReceiver, ReceiverStatus};
use crate::ccp_sender::{CcpSender, SenderStatus};
use crate::routing_table::ForwardingRoutingTable;

/// Timing shared by every CCP sender.
#[derive(Debug, Clone, Copy)]
pub struct SenderTiming {
    pub route_expiry: Duration,
    pub broadcast_interval: Duration,
}

/// A routing peer: an account we exchange routes with in one or both
/// directions.
pub struct Peer {
    account_id: String,
    sender: Option<Arc<CcpSender>>,
    receiver: Option<Arc<CcpReceiver>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub send: Option<SenderStatus>,
    pub receive: Option<ReceiverStatus>,
}

impl Peer {
    pub fn new(
        account_id: &str,
        plugin: Arc<dyn Plugin>,
        send_routes: bool,
        receive_routes: bool,
        table: Arc<ForwardingRoutingTable>,
        accounts: Arc<Accounts>,
        timing: SenderTiming,
    ) -> Self {
        let sender = send_routes.then(|| {
            Arc::new(CcpSender::new(
                account_id,
                plugin.clone(),
                table,
                accounts,
                timing.route_expiry,
                timing.broadcast_interval,
            ))
        });
        let receiver = receive_routes.then(|| Arc::new(CcpReceiver::new(account_id, plugin)));
        Self {
            account_id: account_id.to_string(),
            sender,
            receiver,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn sender(&self) -> Option<&Arc<CcpSender>> {
        self.sender.as_ref()
    }

    pub fn receiver(&self) -> Option<&Arc<CcpReceiver>> {
        self.receiver.as_ref()
    }

    /// Cancel all timers owned by this peer.
    pub fn stop(&self) {
        if let Some(sender) = &self.sender {
            sender.stop();
        }
        if let Some(receiver) = &self.receiver {
            receiver.stop();
        }
    }

    pub fn status(&self) -> PeerStatus {
        PeerStatus {
            send: self.sender.as_ref().map(|s| s.status()),
            receive: self.receiver.as_ref().map(|r| r.status()),
        }
    }
}
