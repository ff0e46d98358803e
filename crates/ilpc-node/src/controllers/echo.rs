use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use ilpc_core::oer::OerReader;
use ilpc_core::{IlpError, Prepare};
use ilpc_middleware::OutgoingHandlers;

use crate::route_builder::RouteBuilder;

pub const ECHO_DATA_PREFIX: &[u8; 16] = b"ECHOECHOECHOECHO";
const MINIMUM_ECHO_PACKET_DATA_LENGTH: usize = ECHO_DATA_PREFIX.len() + 1;
const ECHO_REQUEST: u8 = 0;
const ECHO_RESPONSE: u8 = 1;

/// Answers echo requests addressed to this connector by sending a
/// response prepare back to the requester.
pub struct EchoController {
    route_builder: Arc<RouteBuilder>,
}

impl EchoController {
    pub fn new(route_builder: Arc<RouteBuilder>) -> Self {
        Self { route_builder }
    }

    pub async fn handle(
        &self,
        prepare: &Prepare,
        source_account: &str,
        outbound: &OutgoingHandlers,
    ) -> Result<Bytes, IlpError> {
        if prepare.data.len() < MINIMUM_ECHO_PACKET_DATA_LENGTH {
            return Err(IlpError::invalid_packet(format!(
                "packet data too short for echo request. length={}",
                prepare.data.len()
            )));
        }
        if &prepare.data[..ECHO_DATA_PREFIX.len()] != ECHO_DATA_PREFIX {
            return Err(IlpError::invalid_packet("packet data does not start with ECHO prefix."));
        }

        let mut reader = OerReader::new(&prepare.data);
        reader.skip(ECHO_DATA_PREFIX.len())?;
        if reader.read_u8()? != ECHO_REQUEST {
            tracing::error!(source_account = %source_account, "received unexpected ping response");
            return Err(IlpError::invalid_packet("unexpected ping response."));
        }
        let source_address = reader.read_var_str("source_address")?;
        tracing::trace!(
            source_account = %source_account,
            source_address = %source_address,
            condition = %hex::encode(&prepare.execution_condition[..9]),
            "responding to ping"
        );

        let next_hop = self.route_builder.get_next_hop(source_account, &source_address)?;
        let mut data = BytesMut::with_capacity(MINIMUM_ECHO_PACKET_DATA_LENGTH);
        data.put_slice(ECHO_DATA_PREFIX);
        data.put_u8(ECHO_RESPONSE);
        let response = Prepare {
            amount: prepare.amount,
            expires_at: prepare.expires_at - self.route_builder.config().min_message_window,
            execution_condition: prepare.execution_condition,
            destination: source_address,
            data: data.freeze(),
        };
        outbound.send_data(&next_hop, response.to_bytes()).await
    }
}
