use ilpc_core::{CoreError, ErrorCode, IlpError, PluginError};

/// Errors that can occur within the routing layer.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("cannot process route control messages from non-peers.")]
    ControlFromNonPeer { account: String },

    #[error("rejecting route control message, we are configured not to send routes to you.")]
    SendRoutesDisabled { account: String },

    #[error("cannot process route update messages from non-peers.")]
    UpdateFromNonPeer { account: String },

    #[error("rejecting route update, we are configured not to receive routes from you.")]
    ReceiveRoutesDisabled { account: String },

    #[error("route update timed out.")]
    Timeout,

    #[error("peer rejected ccp message: {code} {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("unknown response packet type: {0}")]
    UnexpectedResponse(u8),

    #[error("transport error: {0}")]
    Transport(#[from] PluginError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<RoutingError> for IlpError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::ControlFromNonPeer { .. }
            | RoutingError::SendRoutesDisabled { .. }
            | RoutingError::UpdateFromNonPeer { .. }
            | RoutingError::ReceiveRoutesDisabled { .. } => IlpError::bad_request(err.to_string()),
            RoutingError::Core(core) => core.into(),
            other => IlpError::internal(other.to_string()),
        }
    }
}
