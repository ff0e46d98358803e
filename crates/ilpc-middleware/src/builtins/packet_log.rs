use bytes::Bytes;
use ilpc_core::{MiddlewareKind, Packet};

use crate::error::PipelineError;
use crate::pipeline::{DataPipeline, Next, PipelineEntry, Pipelines};
use crate::traits::Middleware;

/// Trace-logs every packet and its response. Not part of the default set.
#[derive(Default)]
pub struct PacketLogMiddleware;

impl PacketLogMiddleware {
    pub fn new() -> Self {
        Self
    }
}

fn describe(data: &[u8]) -> String {
    match Packet::from_bytes(data) {
        Ok(Packet::Prepare(p)) => format!(
            "prepare amount={} destination={} expiresAt={}",
            p.amount,
            p.destination,
            p.expires_at.to_rfc3339()
        ),
        Ok(Packet::Fulfill(f)) => format!("fulfill fulfillment={}", hex::encode(f.fulfillment)),
        Ok(Packet::Reject(r)) => format!("reject code={} message={}", r.code, r.message),
        Err(e) => format!("unparseable packet: {}", e),
    }
}

fn log(pipeline: &mut DataPipeline, account_id: &str, direction: &'static str) {
    let id = account_id.to_string();
    pipeline.insert_last(PipelineEntry::new(
        MiddlewareKind::PacketLog.name(),
        move |data: Bytes, next: Next<Bytes, Bytes>| {
            let id = id.clone();
            async move {
                tracing::trace!(account_id = %id, direction, packet = %describe(&data), "request");
                let result = next.run(data).await;
                match &result {
                    Ok(response) => {
                        tracing::trace!(account_id = %id, direction, packet = %describe(response), "response")
                    }
                    Err(e) => tracing::trace!(account_id = %id, direction, error = %e, "failed"),
                }
                result
            }
        },
    ));
}

impl Middleware for PacketLogMiddleware {
    fn apply(&self, account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError> {
        log(&mut pipelines.incoming_data, account_id, "incoming");
        log(&mut pipelines.outgoing_data, account_id, "outgoing");
        Ok(())
    }
}
