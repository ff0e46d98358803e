//! Exchange rates between accounts, and the accounting hooks called
//! after each forwarded packet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ilpc_core::{Accounts, Prepare, Rate};

use crate::error::BackendError;

/// A completed forward, reported on fulfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentParams {
    pub source_account: String,
    pub source_amount: u64,
    pub destination_account: String,
    pub destination_amount: u64,
}

/// Every forwarded packet, whatever the outcome.
#[derive(Debug, Clone)]
pub struct PacketParams {
    pub source_account: String,
    pub source_amount: u64,
    pub destination_account: String,
    pub destination_amount: u64,
    pub prepare: Prepare,
    pub result: Bytes,
}

#[async_trait]
pub trait RateBackend: Send + Sync {
    async fn connect(&self) -> Result<(), BackendError>;

    /// Rate to apply to amounts going from `source_account` to
    /// `destination_account`.
    async fn get_rate(&self, source_account: &str, destination_account: &str) -> Result<Rate, BackendError>;

    async fn submit_payment(&self, params: &PaymentParams) -> Result<(), BackendError>;

    async fn submit_packet(&self, _params: &PacketParams) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Treats every asset as equal, adjusting only for scale and spread.
pub struct OneToOneBackend {
    accounts: Arc<Accounts>,
    spread: Rate,
    connected: AtomicBool,
}

impl OneToOneBackend {
    pub fn new(accounts: Arc<Accounts>, spread: Rate) -> Self {
        Self {
            accounts,
            spread,
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RateBackend for OneToOneBackend {
    async fn connect(&self) -> Result<(), BackendError> {
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(spread = %self.spread, "one-to-one backend ready");
        Ok(())
    }

    async fn get_rate(&self, source_account: &str, destination_account: &str) -> Result<Rate, BackendError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BackendError::NotConnected);
        }
        let source = self
            .accounts
            .info(source_account)
            .map_err(|_| BackendError::UnknownAccount(source_account.to_string()))?;
        let destination = self
            .accounts
            .info(destination_account)
            .map_err(|_| BackendError::UnknownAccount(destination_account.to_string()))?;

        let exponent = i32::from(destination.asset_scale) - i32::from(source.asset_scale);
        let rate = self.spread.one_minus()?.scaled(exponent)?;
        tracing::trace!(
            source_account,
            destination_account,
            source_scale = source.asset_scale,
            destination_scale = destination.asset_scale,
            rate = %rate,
            "quoted rate"
        );
        Ok(rate)
    }

    async fn submit_payment(&self, params: &PaymentParams) -> Result<(), BackendError> {
        tracing::trace!(
            source_account = %params.source_account,
            source_amount = params.source_amount,
            destination_account = %params.destination_account,
            destination_amount = params.destination_amount,
            "payment forwarded"
        );
        Ok(())
    }
}
