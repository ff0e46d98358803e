use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ilpc_core::{Accounts, IlpError};

use crate::error::PipelineError;
use crate::manager::OutgoingHandlers;
use crate::pipeline::Pipelines;
use crate::stats::Stats;

/// A packet interceptor. Installs entries into an account's pipelines
/// whenever a plugin is attached.
pub trait Middleware: Send + Sync {
    fn apply(&self, account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError>;
}

/// Handles incoming packets once they have passed the incoming data
/// pipeline.
#[async_trait]
pub trait DataProcessor: Send + Sync {
    async fn process_data(
        &self,
        data: Bytes,
        account_id: &str,
        outbound: &OutgoingHandlers,
    ) -> Result<Bytes, IlpError>;
}

/// What a middleware can reach outside its own state.
#[derive(Clone)]
pub struct MiddlewareServices {
    pub accounts: Arc<Accounts>,
    pub stats: Arc<Stats>,
    pub outgoing: OutgoingHandlers,
}
