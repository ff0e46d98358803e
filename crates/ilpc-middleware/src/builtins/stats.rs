use bytes::Bytes;
use ilpc_core::{IlpError, MiddlewareKind, PacketType, Prepare, Reject};

use crate::error::PipelineError;
use crate::pipeline::{Next, PipelineEntry, Pipelines};
use crate::stats::{Metric, Stats};
use crate::traits::{Middleware, MiddlewareServices};

/// Counts packets and money per account by outcome.
pub struct StatsMiddleware {
    services: MiddlewareServices,
}

impl StatsMiddleware {
    pub fn new(services: MiddlewareServices) -> Self {
        Self { services }
    }
}

/// Record the outcome of one data exchange.
fn record_data(
    stats: &Stats,
    packets: Metric,
    value: Metric,
    account_id: &str,
    amount: Option<u64>,
    result: &Result<Bytes, IlpError>,
    with_code: bool,
) {
    match result {
        Ok(response) => match PacketType::of(response) {
            Some(PacketType::Fulfill) => {
                stats.increment(packets, account_id, &[("result", "fulfilled")], 1);
                if let Some(amount) = amount {
                    stats.increment(value, account_id, &[("result", "fulfilled")], amount);
                }
            }
            Some(PacketType::Reject) if with_code => {
                let code = Reject::from_bytes(response)
                    .map(|r| r.code.to_string())
                    .unwrap_or_default();
                stats.increment(packets, account_id, &[("result", "rejected"), ("code", code.as_str())], 1);
            }
            _ => stats.increment(packets, account_id, &[("result", "rejected")], 1),
        },
        Err(_) => stats.increment(packets, account_id, &[("result", "failed")], 1),
    }
}

fn record_money(stats: &Stats, metric: Metric, account_id: &str, amount: u64, ok: bool) {
    let result = if ok { "succeeded" } else { "failed" };
    stats.increment(metric, account_id, &[("result", result)], amount);
}

impl Middleware for StatsMiddleware {
    fn apply(&self, account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError> {
        let name = MiddlewareKind::Stats.name();

        for (pipeline, packets, value, with_code) in [
            (
                &mut pipelines.incoming_data,
                Metric::IncomingDataPackets,
                Metric::IncomingDataPacketValue,
                false,
            ),
            (
                &mut pipelines.outgoing_data,
                Metric::OutgoingDataPackets,
                Metric::OutgoingDataPacketValue,
                true,
            ),
        ] {
            let stats = self.services.stats.clone();
            let id = account_id.to_string();
            pipeline.insert_last(PipelineEntry::new(
                name,
                move |data: Bytes, next: Next<Bytes, Bytes>| {
                    let stats = stats.clone();
                    let id = id.clone();
                    async move {
                        let amount = match PacketType::of(&data) {
                            Some(PacketType::Prepare) => Prepare::from_bytes(&data).ok().map(|p| p.amount),
                            _ => None,
                        };
                        let result = next.run(data).await;
                        record_data(&stats, packets, value, &id, amount, &result, with_code);
                        result
                    }
                },
            ));
        }

        for (pipeline, metric) in [
            (&mut pipelines.incoming_money, Metric::IncomingMoney),
            (&mut pipelines.outgoing_money, Metric::OutgoingMoney),
        ] {
            let stats = self.services.stats.clone();
            let id = account_id.to_string();
            pipeline.insert_last(PipelineEntry::new(name, move |amount: u64, next: Next<u64, ()>| {
                let stats = stats.clone();
                let id = id.clone();
                async move {
                    let result = next.run(amount).await;
                    record_money(&stats, metric, &id, amount, result.is_ok());
                    result
                }
            }));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::builtins::testing::{accounts_with, answer, fail, fulfill, prepare, reject, run, services};
    use crate::pipeline::handler;
    use ilpc_core::{AccountInfo, ErrorCode, Relation};

    fn applied() -> (Arc<Stats>, Pipelines) {
        let services = services(accounts_with("bob", AccountInfo::new(Relation::Peer, "USD", 2)));
        let stats = services.stats.clone();
        let mut pipelines = Pipelines::default();
        StatsMiddleware::new(services).apply("bob", &mut pipelines).unwrap();
        (stats, pipelines)
    }

    #[tokio::test]
    async fn test_counts_packets_by_result() {
        let (stats, pipelines) = applied();
        run(&pipelines.incoming_data, answer(fulfill()))(prepare(30).to_bytes())
            .await
            .unwrap();
        run(&pipelines.incoming_data, fail(IlpError::internal("boom")))(prepare(1).to_bytes())
            .await
            .unwrap_err();
        run(
            &pipelines.outgoing_data,
            answer(reject(ErrorCode::F02Unreachable, "no route")),
        )(prepare(1).to_bytes())
        .await
        .unwrap();

        let fulfilled = [("result", "fulfilled")];
        assert_eq!(stats.get(Metric::IncomingDataPackets, "bob", &fulfilled), Some(1));
        assert_eq!(stats.get(Metric::IncomingDataPacketValue, "bob", &fulfilled), Some(30));
        assert_eq!(
            stats.get(Metric::IncomingDataPackets, "bob", &[("result", "failed")]),
            Some(1)
        );
        assert_eq!(
            stats.get(
                Metric::OutgoingDataPackets,
                "bob",
                &[("result", "rejected"), ("code", "F02")]
            ),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_counts_money() {
        let (stats, pipelines) = applied();
        let ok = run(&pipelines.outgoing_money, handler(|_: u64| async { Ok::<_, IlpError>(()) }));
        ok(40).await.unwrap();
        ok(2).await.unwrap();
        let broken = run(
            &pipelines.incoming_money,
            handler(|_: u64| async { Err::<(), _>(IlpError::internal("nope")) }),
        );
        broken(5).await.unwrap_err();

        assert_eq!(
            stats.get(Metric::OutgoingMoney, "bob", &[("result", "succeeded")]),
            Some(42)
        );
        assert_eq!(stats.get(Metric::IncomingMoney, "bob", &[("result", "failed")]), Some(5));
    }
}
