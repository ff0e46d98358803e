//! Built-in middlewares, one module per kind.

mod alert;
mod balance;
mod deduplicate;
mod error_handler;
mod expire;
mod max_packet_amount;
mod packet_log;
mod rate_limit;
mod stats;
mod throughput;
mod validate_fulfillment;

pub use alert::{Alert, AlertMiddleware};
pub use balance::{Balance, BalanceMiddleware, BalanceSnapshot, BalanceStatus};
pub use deduplicate::DeduplicateMiddleware;
pub use error_handler::ErrorHandlerMiddleware;
pub use expire::ExpireMiddleware;
pub use max_packet_amount::MaxPacketAmountMiddleware;
pub use packet_log::PacketLogMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use stats::StatsMiddleware;
pub use throughput::ThroughputMiddleware;
pub use validate_fulfillment::ValidateFulfillmentMiddleware;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use bytes::Bytes;
    use chrono::{Duration, Utc};
    use ilpc_core::{Accounts, Fulfill, IlpError, MemoryPlugin, Prepare, Reject};

    use crate::manager::OutgoingHandlers;
    use crate::pipeline::{compose, handler, Handler, MiddlewarePipeline};
    use crate::stats::Stats;
    use crate::traits::MiddlewareServices;

    /// Services with no reachable outgoing handlers.
    pub fn services(accounts: Arc<Accounts>) -> MiddlewareServices {
        MiddlewareServices {
            accounts,
            stats: Arc::new(Stats::new()),
            outgoing: OutgoingHandlers::detached(),
        }
    }

    pub fn accounts_with(id: &str, info: ilpc_core::AccountInfo) -> Arc<Accounts> {
        let accounts = Arc::new(Accounts::new(Some("test.me".into())));
        accounts
            .add(id, info, Arc::new(MemoryPlugin::pair().0))
            .expect("fresh account");
        accounts
    }

    pub fn prepare(amount: u64) -> Prepare {
        Prepare {
            amount,
            expires_at: Utc::now() + Duration::seconds(30),
            execution_condition: ilpc_core::hashing::sha256(&[7; 32]),
            destination: "test.bob".into(),
            data: Bytes::from_static(b"hello"),
        }
    }

    pub fn fulfill() -> Bytes {
        Fulfill {
            fulfillment: [7; 32],
            data: Bytes::new(),
        }
        .to_bytes()
    }

    pub fn reject(code: ilpc_core::ErrorCode, message: &str) -> Bytes {
        Reject {
            code,
            triggered_by: "test.bob".into(),
            message: message.into(),
            data: Bytes::new(),
        }
        .to_bytes()
    }

    /// Terminal that always answers with `response`.
    pub fn answer(response: Bytes) -> Handler<Bytes, Bytes> {
        handler(move |_: Bytes| {
            let response = response.clone();
            async move { Ok::<_, IlpError>(response) }
        })
    }

    pub fn fail(err: IlpError) -> Handler<Bytes, Bytes> {
        handler(move |_: Bytes| {
            let err = err.clone();
            async move { Err::<Bytes, _>(err) }
        })
    }

    pub fn run<I, O>(pipeline: &MiddlewarePipeline<I, O>, terminal: Handler<I, O>) -> Handler<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        compose(pipeline.methods(), terminal)
    }
}
