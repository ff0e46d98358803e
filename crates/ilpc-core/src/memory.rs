//! In-process plugin pair. Each end delivers directly into the other end's
//! handlers. Used by tests and by the demo binary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::PluginError;
use crate::plugin::{DataHandler, MoneyHandler, Plugin, PluginEvent};

const EVENT_CHANNEL_CAPACITY: usize = 16;

struct Endpoint {
    connected: AtomicBool,
    data_handler: RwLock<Option<DataHandler>>,
    money_handler: RwLock<Option<MoneyHandler>>,
    events: broadcast::Sender<PluginEvent>,
}

impl Endpoint {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            connected: AtomicBool::new(false),
            data_handler: RwLock::new(None),
            money_handler: RwLock::new(None),
            events,
        })
    }
}

/// One end of a linked in-memory plugin pair.
pub struct MemoryPlugin {
    local: Arc<Endpoint>,
    remote: Arc<Endpoint>,
}

impl MemoryPlugin {
    /// Create two linked ends. Both start disconnected.
    pub fn pair() -> (MemoryPlugin, MemoryPlugin) {
        let a = Endpoint::new();
        let b = Endpoint::new();
        (
            MemoryPlugin {
                local: a.clone(),
                remote: b.clone(),
            },
            MemoryPlugin {
                local: b,
                remote: a,
            },
        )
    }

    fn remote_ready(&self) -> Result<(), PluginError> {
        if !self.local.connected.load(Ordering::SeqCst) {
            return Err(PluginError::NotConnected);
        }
        if !self.remote.connected.load(Ordering::SeqCst) {
            return Err(PluginError::Transport("remote end is not connected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for MemoryPlugin {
    async fn connect(&self) -> Result<(), PluginError> {
        if !self.local.connected.swap(true, Ordering::SeqCst) {
            let _ = self.local.events.send(PluginEvent::Connect);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PluginError> {
        if self.local.connected.swap(false, Ordering::SeqCst) {
            let _ = self.local.events.send(PluginEvent::Disconnect);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.local.connected.load(Ordering::SeqCst)
    }

    async fn send_data(&self, data: Bytes) -> Result<Bytes, PluginError> {
        self.remote_ready()?;
        let handler = self
            .remote
            .data_handler
            .read()
            .clone()
            .ok_or(PluginError::NoHandler)?;
        Ok(handler(data).await?)
    }

    async fn send_money(&self, amount: u64) -> Result<(), PluginError> {
        self.remote_ready()?;
        let handler = self
            .remote
            .money_handler
            .read()
            .clone()
            .ok_or(PluginError::NoHandler)?;
        Ok(handler(amount).await?)
    }

    fn register_data_handler(&self, handler: DataHandler) -> Result<(), PluginError> {
        let mut slot = self.local.data_handler.write();
        if slot.is_some() {
            return Err(PluginError::HandlerAlreadyRegistered("data"));
        }
        *slot = Some(handler);
        Ok(())
    }

    fn deregister_data_handler(&self) {
        *self.local.data_handler.write() = None;
    }

    fn register_money_handler(&self, handler: MoneyHandler) -> Result<(), PluginError> {
        let mut slot = self.local.money_handler.write();
        if slot.is_some() {
            return Err(PluginError::HandlerAlreadyRegistered("money"));
        }
        *slot = Some(handler);
        Ok(())
    }

    fn deregister_money_handler(&self) {
        *self.local.money_handler.write() = None;
    }

    fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.local.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IlpError;
    use futures::FutureExt;
    use std::sync::atomic::AtomicU64;

    #[tokio::test]
    async fn test_send_data_reaches_remote_handler() {
        let (a, b) = MemoryPlugin::pair();
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        b.register_data_handler(Arc::new(|data: Bytes| {
            async move {
                let mut reply = data.to_vec();
                reply.reverse();
                Ok::<_, IlpError>(Bytes::from(reply))
            }
            .boxed()
        }))
        .unwrap();

        let reply = a.send_data(Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(&reply[..], b"cba");
    }

    #[tokio::test]
    async fn test_send_requires_connection_and_handler() {
        let (a, b) = MemoryPlugin::pair();
        assert!(matches!(
            a.send_data(Bytes::new()).await,
            Err(PluginError::NotConnected)
        ));
        a.connect().await.unwrap();
        assert!(matches!(
            a.send_data(Bytes::new()).await,
            Err(PluginError::Transport(_))
        ));
        b.connect().await.unwrap();
        assert!(matches!(
            a.send_data(Bytes::new()).await,
            Err(PluginError::NoHandler)
        ));
    }

    #[tokio::test]
    async fn test_money_handler_and_ilp_error_passthrough() {
        let (a, b) = MemoryPlugin::pair();
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let received = Arc::new(AtomicU64::new(0));
        let sink = received.clone();
        b.register_money_handler(Arc::new(move |amount: u64| {
            let sink = sink.clone();
            async move {
                if amount == 0 {
                    return Err(IlpError::bad_request("zero"));
                }
                sink.fetch_add(amount, Ordering::SeqCst);
                Ok::<_, IlpError>(())
            }
            .boxed()
        }))
        .unwrap();

        a.send_money(40).await.unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 40);
        assert!(matches!(a.send_money(0).await, Err(PluginError::Ilp(_))));
    }

    #[tokio::test]
    async fn test_events_and_duplicate_handler() {
        let (a, _b) = MemoryPlugin::pair();
        let mut events = a.subscribe();
        a.connect().await.unwrap();
        a.connect().await.unwrap();
        a.disconnect().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), PluginEvent::Connect);
        assert_eq!(events.recv().await.unwrap(), PluginEvent::Disconnect);

        let noop: DataHandler = Arc::new(|_: Bytes| async { Ok::<_, IlpError>(Bytes::new()) }.boxed());
        a.register_data_handler(noop.clone()).unwrap();
        assert!(a.register_data_handler(noop.clone()).is_err());
        a.deregister_data_handler();
        a.register_data_handler(noop).unwrap();
    }
}
