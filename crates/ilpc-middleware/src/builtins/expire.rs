use bytes::Bytes;
use chrono::Utc;
use ilpc_core::{IlpError, MiddlewareKind, PacketType, Prepare};

use crate::error::PipelineError;
use crate::pipeline::{Next, PipelineEntry, Pipelines};
use crate::traits::Middleware;

/// Fails outgoing prepares that are still unanswered at their expiry.
#[derive(Default)]
pub struct ExpireMiddleware;

impl ExpireMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for ExpireMiddleware {
    fn apply(&self, _account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError> {
        pipelines.outgoing_data.insert_last(PipelineEntry::new(
            MiddlewareKind::Expire.name(),
            |data: Bytes, next: Next<Bytes, Bytes>| async move {
                if PacketType::of(&data) != Some(PacketType::Prepare) {
                    return next.run(data).await;
                }
                let prepare = Prepare::from_bytes(&data)?;
                let remaining = (prepare.expires_at - Utc::now()).to_std().unwrap_or_default();
                match tokio::time::timeout(remaining, next.run(data)).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::debug!(
                            condition = %hex::encode(&prepare.execution_condition[..6]),
                            expires_at = %prepare.expires_at.to_rfc3339(),
                            "packet expired"
                        );
                        Err(IlpError::transfer_timed_out("packet expired."))
                    }
                }
            },
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::testing::{fulfill, prepare, run};
    use crate::pipeline::handler;
    use ilpc_core::ErrorCode;
    use std::time::Duration;

    fn applied() -> Pipelines {
        let mut pipelines = Pipelines::default();
        ExpireMiddleware::new().apply("bob", &mut pipelines).unwrap();
        pipelines
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let pipelines = applied();
        let slow = handler(|_: Bytes| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, IlpError>(fulfill())
        });
        let mut packet = prepare(1);
        packet.expires_at = Utc::now() + chrono::Duration::milliseconds(50);
        let err = run(&pipelines.outgoing_data, slow)(packet.to_bytes()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::R00TransferTimedOut);
        assert_eq!(err.message, "packet expired.");
    }

    #[tokio::test]
    async fn test_prompt_response_passes() {
        let pipelines = applied();
        let fast = handler(|_: Bytes| async { Ok::<_, IlpError>(fulfill()) });
        let response = run(&pipelines.outgoing_data, fast)(prepare(1).to_bytes()).await.unwrap();
        assert_eq!(response, fulfill());
    }
}
