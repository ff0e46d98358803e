use ilpc_core::{CoreError, IlpError, PluginError};

/// Errors that can occur while building or driving middleware pipelines.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("could not insert {position} middleware; not found. name={name}")]
    AnchorNotFound {
        position: &'static str,
        name: String,
    },

    #[error("custom middleware has same name as built-in middleware. name={0}")]
    NameCollision(String),

    #[error("failed to apply middleware. middlewareName={middleware} accountId={account_id}: {source}")]
    Apply {
        middleware: String,
        account_id: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("account not found. accountId={0}")]
    NoBalance(String),

    #[error(transparent)]
    Ilp(#[from] IlpError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<PipelineError> for IlpError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Ilp(e) => e,
            PipelineError::Core(e) => e.into(),
            other => IlpError::internal(other.to_string()),
        }
    }
}
