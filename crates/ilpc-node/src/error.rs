use ilpc_core::{CoreError, IlpError};

/// Errors raised by a rate backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unable to fetch account info for account. accountId={0}")]
    UnknownAccount(String),

    #[error("backend is not connected")]
    NotConnected,

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<BackendError> for IlpError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Core(core) => core.into(),
            other => IlpError::internal(other.to_string()),
        }
    }
}
