use bytes::Bytes;
use ilpc_core::hashing::fulfillment_matches;
use ilpc_core::{Fulfill, IlpError, MiddlewareKind, PacketType, Prepare};

use crate::error::PipelineError;
use crate::pipeline::{Next, PipelineEntry, Pipelines};
use crate::traits::Middleware;

/// Checks that fulfillments coming back for our prepares hash to the
/// execution condition.
#[derive(Default)]
pub struct ValidateFulfillmentMiddleware;

impl ValidateFulfillmentMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for ValidateFulfillmentMiddleware {
    fn apply(&self, account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError> {
        let id = account_id.to_string();
        pipelines.outgoing_data.insert_last(PipelineEntry::new(
            MiddlewareKind::ValidateFulfillment.name(),
            move |data: Bytes, next: Next<Bytes, Bytes>| {
                let id = id.clone();
                async move {
                    if PacketType::of(&data) != Some(PacketType::Prepare) {
                        return next.run(data).await;
                    }
                    let condition = Prepare::from_bytes(&data)?.execution_condition;
                    let result = next.run(data).await?;
                    if PacketType::of(&result) == Some(PacketType::Fulfill) {
                        let fulfillment = Fulfill::from_bytes(&result)?.fulfillment;
                        if !fulfillment_matches(&fulfillment, &condition) {
                            tracing::error!(
                                account_id = %id,
                                fulfillment = %hex::encode(fulfillment),
                                execution_condition = %hex::encode(condition),
                                "received incorrect fulfillment from account"
                            );
                            return Err(IlpError::wrong_condition("fulfillment did not match expected value."));
                        }
                    }
                    Ok(result)
                }
            },
        ));
        Ok(())
    }
}
