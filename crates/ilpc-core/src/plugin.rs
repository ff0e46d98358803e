//! Transport plugin contract.
//!
//! A plugin is an opaque, bidirectional channel to one account. The
//! connector sends serialized ILP packets and settlement amounts through it,
//! and receives the counterparty's traffic through registered handlers.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::broadcast;

use crate::error::{IlpError, PluginError};

/// Handler for incoming serialized ILP packets. Resolves to the response.
pub type DataHandler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<Bytes, IlpError>> + Send + Sync>;

/// Handler for incoming settlements.
pub type MoneyHandler = Arc<dyn Fn(u64) -> BoxFuture<'static, Result<(), IlpError>> + Send + Sync>;

/// Connection state changes published by a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginEvent {
    Connect,
    Disconnect,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    async fn connect(&self) -> Result<(), PluginError>;

    async fn disconnect(&self) -> Result<(), PluginError>;

    fn is_connected(&self) -> bool;

    /// Send a serialized ILP packet and wait for the serialized response.
    async fn send_data(&self, data: Bytes) -> Result<Bytes, PluginError>;

    /// Transfer `amount` to the counterparty.
    async fn send_money(&self, amount: u64) -> Result<(), PluginError>;

    fn register_data_handler(&self, handler: DataHandler) -> Result<(), PluginError>;

    fn deregister_data_handler(&self);

    fn register_money_handler(&self, handler: MoneyHandler) -> Result<(), PluginError>;

    fn deregister_money_handler(&self);

    /// Receive future connect/disconnect events.
    fn subscribe(&self) -> broadcast::Receiver<PluginEvent>;
}
