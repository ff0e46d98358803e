use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ilpc_core::{IlpError, MiddlewareKind};

use crate::error::PipelineError;
use crate::pipeline::{Next, PipelineEntry, Pipelines};
use crate::stats::Metric;
use crate::token_bucket::TokenBucket;
use crate::traits::{Middleware, MiddlewareServices};

const THROTTLED: &str = "too many requests, throttling.";

/// Limits how many packets and money transfers an account may send us.
pub struct RateLimitMiddleware {
    services: MiddlewareServices,
}

impl RateLimitMiddleware {
    pub fn new(services: MiddlewareServices) -> Self {
        Self { services }
    }
}

impl Middleware for RateLimitMiddleware {
    fn apply(&self, account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError> {
        let settings = self.services.accounts.info(account_id)?.rate_limit;
        let bucket = Arc::new(TokenBucket::new(
            Duration::from_millis(settings.refill_period_ms),
            settings.refill_count,
            settings.capacity,
        ));
        let name = MiddlewareKind::RateLimit.name();

        let limiter = bucket.clone();
        let stats = self.services.stats.clone();
        let id = account_id.to_string();
        pipelines.incoming_data.insert_last(PipelineEntry::new(
            name,
            move |data: Bytes, next: Next<Bytes, Bytes>| {
                let allowed = limiter.take(1);
                let stats = stats.clone();
                let id = id.clone();
                async move {
                    if !allowed {
                        tracing::debug!(account_id = %id, "rate limit exceeded for incoming packet");
                        stats.increment(Metric::RateLimitedPackets, &id, &[], 1);
                        return Err(IlpError::rate_limited(THROTTLED));
                    }
                    next.run(data).await
                }
            },
        ));

        let stats = self.services.stats.clone();
        let id = account_id.to_string();
        pipelines.incoming_money.insert_last(PipelineEntry::new(
            name,
            move |amount: u64, next: Next<u64, ()>| {
                let allowed = bucket.take(1);
                let stats = stats.clone();
                let id = id.clone();
                async move {
                    if !allowed {
                        tracing::debug!(account_id = %id, amount, "rate limit exceeded for incoming money");
                        stats.increment(Metric::RateLimitedMoney, &id, &[], 1);
                        return Err(IlpError::rate_limited(THROTTLED));
                    }
                    next.run(amount).await
                }
            },
        ));

        Ok(())
    }
}
