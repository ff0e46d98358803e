use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ilpc_core::{IlpError, MiddlewareKind, PacketType, Prepare};

use crate::error::PipelineError;
use crate::pipeline::{DataPipeline, Next, PipelineEntry, Pipelines};
use crate::token_bucket::TokenBucket;
use crate::traits::{Middleware, MiddlewareServices};

/// Limits the amount of money per period flowing in each direction.
pub struct ThroughputMiddleware {
    services: MiddlewareServices,
}

impl ThroughputMiddleware {
    pub fn new(services: MiddlewareServices) -> Self {
        Self { services }
    }
}

fn limit(
    pipeline: &mut DataPipeline,
    account_id: &str,
    direction: &'static str,
    bucket: TokenBucket,
) {
    let bucket = Arc::new(bucket);
    let id = account_id.to_string();
    pipeline.insert_last(PipelineEntry::new(
        MiddlewareKind::Throughput.name(),
        move |data: Bytes, next: Next<Bytes, Bytes>| {
            let bucket = bucket.clone();
            let id = id.clone();
            async move {
                if PacketType::of(&data) == Some(PacketType::Prepare) {
                    let amount = Prepare::from_bytes(&data)?.amount;
                    if !bucket.take(amount) {
                        tracing::debug!(
                            account_id = %id,
                            direction,
                            amount,
                            "throttling packet due to throughput limit"
                        );
                        return Err(IlpError::insufficient_liquidity(
                            "exceeded money bandwidth, throttling.",
                        ));
                    }
                }
                next.run(data).await
            }
        },
    ));
}

impl Middleware for ThroughputMiddleware {
    fn apply(&self, account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError> {
        let settings = self.services.accounts.info(account_id)?.throughput;
        let period = Duration::from_millis(settings.refill_period_ms);

        if let Some(amount) = settings.incoming_amount {
            limit(
                &mut pipelines.incoming_data,
                account_id,
                "incoming",
                TokenBucket::new(period, amount, None),
            );
        }
        if let Some(amount) = settings.outgoing_amount {
            limit(
                &mut pipelines.outgoing_data,
                account_id,
                "outgoing",
                TokenBucket::new(period, amount, None),
            );
        }
        Ok(())
    }
}
