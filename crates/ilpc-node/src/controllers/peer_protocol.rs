use bytes::Bytes;
use ilpc_core::ccp::PEER_PROTOCOL_CONDITION;
use ilpc_core::ildcp::ILDCP_DESTINATION;
use ilpc_core::{IlpError, Prepare};

use super::{CcpController, IldcpHostController};

/// Routes `peer.*` prepares to ILDCP or CCP.
pub struct PeerProtocolController {
    ildcp: IldcpHostController,
    ccp: CcpController,
}

impl PeerProtocolController {
    pub fn new(ildcp: IldcpHostController, ccp: CcpController) -> Self {
        Self { ildcp, ccp }
    }

    pub fn handle(&self, prepare: &Prepare, source_account: &str) -> Result<Bytes, IlpError> {
        if prepare.execution_condition != PEER_PROTOCOL_CONDITION {
            return Err(IlpError::invalid_packet("condition must be peer protocol condition."));
        }
        if prepare.destination == ILDCP_DESTINATION {
            self.ildcp.handle(source_account)
        } else if prepare.destination.starts_with("peer.route") {
            self.ccp.handle(prepare, source_account)
        } else {
            Err(IlpError::invalid_packet("unknown peer protocol."))
        }
    }
}
