//! Entry point for packets that made it through an account's incoming
//! pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ilpc_core::{Accounts, IlpError, PacketType};
use ilpc_middleware::{DataProcessor, OutgoingHandlers};
use ilpc_routing::RouteBroadcaster;

use crate::controllers::{
    CcpController, EchoController, IldcpHostController, PeerProtocolController, PrepareController,
};
use crate::rate_backend::RateBackend;
use crate::route_builder::RouteBuilder;

pub struct Core {
    accounts: Arc<Accounts>,
    prepare: PrepareController,
}

impl Core {
    pub fn new(
        accounts: Arc<Accounts>,
        route_builder: Arc<RouteBuilder>,
        backend: Arc<dyn RateBackend>,
        broadcaster: Arc<RouteBroadcaster>,
    ) -> Self {
        let peer_protocol = PeerProtocolController::new(
            IldcpHostController::new(accounts.clone()),
            CcpController::new(broadcaster),
        );
        let echo = EchoController::new(route_builder.clone());
        let prepare = PrepareController::new(accounts.clone(), route_builder, backend, peer_protocol, echo);
        Self { accounts, prepare }
    }
}

#[async_trait]
impl DataProcessor for Core {
    async fn process_data(
        &self,
        data: Bytes,
        account_id: &str,
        outbound: &OutgoingHandlers,
    ) -> Result<Bytes, IlpError> {
        if !self.accounts.exists(account_id) {
            tracing::warn!(account_id = %account_id, "got data from unknown account id");
            return Err(IlpError::internal(format!(
                "got data from unknown account id. accountId={}",
                account_id
            )));
        }
        match PacketType::of(&data) {
            Some(PacketType::Prepare) => self.prepare.send_data(data, account_id, outbound).await,
            _ => {
                let kind = data.first().map(|b| b.to_string()).unwrap_or_else(|| "none".into());
                tracing::error!(source = %account_id, packet_type = %kind, "received invalid packet type");
                Err(IlpError::invalid_packet(format!(
                    "invalid packet type received. type={}",
                    kind
                )))
            }
        }
    }
}
