use bytes::Bytes;
use ilpc_core::MiddlewareKind;

use crate::error::PipelineError;
use crate::pipeline::{Next, PipelineEntry, Pipelines};
use crate::traits::{Middleware, MiddlewareServices};

/// Outermost incoming entry: turns every error on the data path into a
/// Reject from this node.
pub struct ErrorHandlerMiddleware {
    services: MiddlewareServices,
}

impl ErrorHandlerMiddleware {
    pub fn new(services: MiddlewareServices) -> Self {
        Self { services }
    }
}

impl Middleware for ErrorHandlerMiddleware {
    fn apply(&self, account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError> {
        let name = MiddlewareKind::ErrorHandler.name();

        let accounts = self.services.accounts.clone();
        let id = account_id.to_string();
        pipelines.incoming_data.insert_last(PipelineEntry::new(
            name,
            move |data: Bytes, next: Next<Bytes, Bytes>| {
                let accounts = accounts.clone();
                let id = id.clone();
                async move {
                    match next.run(data).await {
                        Ok(response) => Ok(response),
                        Err(e) => {
                            tracing::debug!(
                                account_id = %id,
                                code = %e.code,
                                error = %e.message,
                                "error in data handler, creating rejection"
                            );
                            Ok(e.to_reject(&accounts.own_address()).to_bytes())
                        }
                    }
                }
            },
        ));

        let id = account_id.to_string();
        pipelines.incoming_money.insert_last(PipelineEntry::new(
            name,
            move |amount: u64, next: Next<u64, ()>| {
                let id = id.clone();
                async move {
                    let result = next.run(amount).await;
                    if let Err(e) = &result {
                        tracing::debug!(account_id = %id, error = %e, "error in money handler");
                    }
                    result
                }
            },
        ));

        Ok(())
    }
}
