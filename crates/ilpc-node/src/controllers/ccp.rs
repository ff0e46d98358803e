use std::sync::Arc;

use bytes::Bytes;
use ilpc_core::ccp::{
    ccp_response, RouteControlRequest, RouteUpdateRequest, CCP_CONTROL_DESTINATION,
    CCP_UPDATE_DESTINATION,
};
use ilpc_core::{IlpError, Prepare};
use ilpc_routing::RouteBroadcaster;

/// Feeds route control and route update requests into the broadcaster.
pub struct CcpController {
    broadcaster: Arc<RouteBroadcaster>,
}

impl CcpController {
    pub fn new(broadcaster: Arc<RouteBroadcaster>) -> Self {
        Self { broadcaster }
    }

    pub fn handle(&self, prepare: &Prepare, source_account: &str) -> Result<Bytes, IlpError> {
        match prepare.destination.as_str() {
            CCP_CONTROL_DESTINATION => {
                let control = RouteControlRequest::from_prepare(prepare)?;
                tracing::trace!(
                    sender = %source_account,
                    table_id = %control.last_known_routing_table_id,
                    epoch = control.last_known_epoch,
                    features = %control.features.join(","),
                    "received route control message"
                );
                self.broadcaster.handle_route_control(source_account, &control)?;
                Ok(ccp_response())
            }
            CCP_UPDATE_DESTINATION => {
                let update = RouteUpdateRequest::from_prepare(prepare)?;
                tracing::trace!(
                    sender = %source_account,
                    speaker = %update.speaker,
                    current_epoch = update.current_epoch_index,
                    from_epoch = update.from_epoch_index,
                    to_epoch = update.to_epoch_index,
                    new_routes = update.new_routes.len(),
                    withdrawn_routes = update.withdrawn_routes.len(),
                    "received routes"
                );
                self.broadcaster.handle_route_update(source_account, &update)?;
                Ok(ccp_response())
            }
            other => Err(IlpError::bad_request(format!(
                "unrecognized ccp message. destination={}",
                other
            ))),
        }
    }
}
