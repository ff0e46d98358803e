use std::sync::Arc;

use bytes::Bytes;
use ilpc_core::{Accounts, IlpError, PacketType, Prepare, Reject};
use ilpc_middleware::OutgoingHandlers;

use super::{EchoController, PeerProtocolController};
use crate::rate_backend::{PacketParams, PaymentParams, RateBackend};
use crate::route_builder::RouteBuilder;

const PEER_PROTOCOL_PREFIX: &str = "peer.";

/// Decides what to do with an incoming prepare: answer it locally or
/// forward it to the next hop.
pub struct PrepareController {
    accounts: Arc<Accounts>,
    route_builder: Arc<RouteBuilder>,
    backend: Arc<dyn RateBackend>,
    peer_protocol: PeerProtocolController,
    echo: EchoController,
}

impl PrepareController {
    pub fn new(
        accounts: Arc<Accounts>,
        route_builder: Arc<RouteBuilder>,
        backend: Arc<dyn RateBackend>,
        peer_protocol: PeerProtocolController,
        echo: EchoController,
    ) -> Self {
        Self {
            accounts,
            route_builder,
            backend,
            peer_protocol,
            echo,
        }
    }

    pub async fn send_data(
        &self,
        data: Bytes,
        source_account: &str,
        outbound: &OutgoingHandlers,
    ) -> Result<Bytes, IlpError> {
        let prepare = Prepare::from_bytes(&data)?;
        tracing::trace!(
            source_account = %source_account,
            destination = %prepare.destination,
            amount = prepare.amount,
            expires_at = %prepare.expires_at.to_rfc3339(),
            "handling ilp prepare"
        );

        if prepare.destination.starts_with(PEER_PROTOCOL_PREFIX) {
            return self.peer_protocol.handle(&prepare, source_account);
        }
        if prepare.destination == self.accounts.own_address() {
            return self.echo.handle(&prepare, source_account, outbound).await;
        }

        let (next_hop, next_packet) = self
            .route_builder
            .get_next_hop_packet(source_account, &prepare)
            .await?;
        tracing::trace!(
            destination = %prepare.destination,
            amount = next_packet.amount,
            next_hop = %next_hop,
            "sending outbound ilp prepare"
        );
        let result = outbound.send_data(&next_hop, next_packet.to_bytes()).await?;

        let destination_amount = next_packet.amount;
        self.submit_packet(PacketParams {
            source_account: source_account.to_string(),
            source_amount: prepare.amount,
            destination_account: next_hop.clone(),
            destination_amount,
            prepare: prepare.clone(),
            result: result.clone(),
        });

        match PacketType::of(&result) {
            Some(PacketType::Fulfill) => {
                tracing::trace!(
                    condition = %hex::encode(&prepare.execution_condition[..6]),
                    next_hop = %next_hop,
                    amount = destination_amount,
                    "got fulfillment"
                );
                self.submit_payment(PaymentParams {
                    source_account: source_account.to_string(),
                    source_amount: prepare.amount,
                    destination_account: next_hop,
                    destination_amount,
                });
            }
            Some(PacketType::Reject) => {
                if let Ok(reject) = Reject::from_bytes(&result) {
                    tracing::trace!(
                        condition = %hex::encode(&prepare.execution_condition[..6]),
                        next_hop = %next_hop,
                        amount = destination_amount,
                        code = %reject.code,
                        triggered_by = %reject.triggered_by,
                        message = %reject.message,
                        "got rejection"
                    );
                }
            }
            _ => {}
        }
        Ok(result)
    }

    fn submit_packet(&self, params: PacketParams) {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.submit_packet(&params).await {
                tracing::error!(error = %e, "error while submitting packet to backend");
            }
        });
    }

    fn submit_payment(&self, params: PaymentParams) {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.submit_payment(&params).await {
                tracing::error!(error = %e, "error while submitting payment to backend");
            }
        });
    }
}
