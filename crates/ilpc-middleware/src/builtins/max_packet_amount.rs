use bytes::Bytes;
use ilpc_core::{IlpError, MiddlewareKind, PacketType, Prepare};

use crate::error::PipelineError;
use crate::pipeline::{Next, PipelineEntry, Pipelines};
use crate::traits::{Middleware, MiddlewareServices};

/// Caps the amount of incoming prepares per account.
pub struct MaxPacketAmountMiddleware {
    services: MiddlewareServices,
}

impl MaxPacketAmountMiddleware {
    pub fn new(services: MiddlewareServices) -> Self {
        Self { services }
    }
}

impl Middleware for MaxPacketAmountMiddleware {
    fn apply(&self, account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError> {
        let Some(max_amount) = self.services.accounts.info(account_id)?.max_packet_amount else {
            return Ok(());
        };
        let id = account_id.to_string();
        pipelines.incoming_data.insert_last(PipelineEntry::new(
            MiddlewareKind::MaxPacketAmount.name(),
            move |data: Bytes, next: Next<Bytes, Bytes>| {
                let id = id.clone();
                async move {
                    if PacketType::of(&data) == Some(PacketType::Prepare) {
                        let amount = Prepare::from_bytes(&data)?.amount;
                        if amount > max_amount {
                            tracing::debug!(
                                account_id = %id,
                                max_amount,
                                actual_amount = amount,
                                "rejecting packet for exceeding max amount"
                            );
                            return Err(IlpError::amount_too_large(format!(
                                "packet size too large. maxAmount={} actualAmount={}",
                                max_amount, amount
                            ))
                            .with_data(amount_too_large_data(amount, max_amount)));
                        }
                    }
                    next.run(data).await
                }
            },
        ));
        Ok(())
    }
}

/// F08 reject data: received and maximum amount as big-endian u64s.
fn amount_too_large_data(received: u64, maximum: u64) -> Bytes {
    let mut data = Vec::with_capacity(16);
    data.extend_from_slice(&received.to_be_bytes());
    data.extend_from_slice(&maximum.to_be_bytes());
    Bytes::from(data)
}
