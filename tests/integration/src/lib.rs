//! Fixtures for end-to-end connector flows.
//!
//! A [`Node`] is a full connector whose accounts are backed by in-memory
//! plugins. Child accounts keep the far end of their plugin so a test can
//! act as the customer; peer accounts are wired to another node's plugin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use ilpc_core::hashing::sha256;
use ilpc_core::{
    AccountInfo, BalanceSettings, ConnectorConfig, Environment, ErrorCode, Fulfill, IlpError, MemoryPlugin,
    Plugin, PluginError, Prepare, Reject, Relation, StaticRoute,
};
use ilpc_node::Connector;
use tokio::sync::mpsc;

pub const FULFILLMENT: [u8; 32] = [7; 32];

/// Both ends of an in-memory link between two connectors.
pub fn link() -> (MemoryPlugin, MemoryPlugin) {
    MemoryPlugin::pair()
}

fn account(relation: Relation, scale: u8) -> AccountInfo {
    let mut info = AccountInfo::new(relation, "USD", scale);
    info.balance = Some(BalanceSettings {
        minimum: Some(-1_000_000),
        maximum: 1_000_000,
        settle_threshold: None,
        settle_to: 0,
    });
    info
}

pub struct NodeBuilder {
    config: ConnectorConfig,
    plugins: HashMap<String, Arc<dyn Plugin>>,
    remotes: HashMap<String, MemoryPlugin>,
}

impl NodeBuilder {
    pub fn new(address: &str) -> Self {
        let mut config = ConnectorConfig::default();
        config.ilp_address = Some(address.to_string());
        config.env = Environment::Test;
        Self {
            config,
            plugins: HashMap::new(),
            remotes: HashMap::new(),
        }
    }

    pub fn child(mut self, id: &str, scale: u8) -> Self {
        let (ours, theirs) = MemoryPlugin::pair();
        self.config.accounts.insert(id.to_string(), account(Relation::Child, scale));
        self.plugins.insert(id.to_string(), Arc::new(ours));
        self.remotes.insert(id.to_string(), theirs);
        self
    }

    pub fn peer(mut self, id: &str, scale: u8, plugin: MemoryPlugin) -> Self {
        self.config.accounts.insert(id.to_string(), account(Relation::Peer, scale));
        self.plugins.insert(id.to_string(), Arc::new(plugin));
        self
    }

    pub fn route(mut self, target_prefix: &str, peer_id: &str) -> Self {
        self.config.routes.push(StaticRoute {
            target_prefix: target_prefix.to_string(),
            peer_id: peer_id.to_string(),
        });
        self
    }

    pub fn build(self) -> anyhow::Result<Node> {
        let connector = Connector::new(self.config, self.plugins)?;
        Ok(Node {
            connector,
            remotes: self.remotes,
        })
    }
}

pub struct Node {
    pub connector: Connector,
    remotes: HashMap<String, MemoryPlugin>,
}

impl Node {
    /// The customer's end of a child account.
    ///
    /// Panics if `id` was not added with [`NodeBuilder::child`].
    pub fn remote(&self, id: &str) -> &MemoryPlugin {
        &self.remotes[id]
    }

    pub fn balance(&self, id: &str) -> Option<i128> {
        self.connector.manager().balance()?.balance_of(id)
    }
}

/// Make the customer end fulfill everything it receives, reporting each
/// prepare on the returned channel.
pub async fn fulfilling(remote: &MemoryPlugin) -> Result<mpsc::UnboundedReceiver<Prepare>, PluginError> {
    let (tx, rx) = mpsc::unbounded_channel();
    remote.register_data_handler(Arc::new(move |data: Bytes| {
        let tx = tx.clone();
        async move {
            if let Ok(prepare) = Prepare::from_bytes(&data) {
                let _ = tx.send(prepare);
            }
            Ok::<_, IlpError>(
                Fulfill {
                    fulfillment: FULFILLMENT,
                    data: Bytes::new(),
                }
                .to_bytes(),
            )
        }
        .boxed()
    }))?;
    remote.connect().await?;
    Ok(rx)
}

/// Make the customer end reject everything with `code`.
pub async fn rejecting(remote: &MemoryPlugin, triggered_by: &str, code: ErrorCode) -> Result<(), PluginError> {
    let triggered_by = triggered_by.to_string();
    remote.register_data_handler(Arc::new(move |_: Bytes| {
        let reject = Reject {
            code,
            triggered_by: triggered_by.clone(),
            message: "not today".into(),
            data: Bytes::new(),
        };
        async move { Ok::<_, IlpError>(reject.to_bytes()) }.boxed()
    }))?;
    remote.connect().await
}

static PACKET_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A fresh prepare. Each call carries distinct data so connectors along
/// the path never treat two payments as one retransmission.
pub fn prepare(destination: &str, amount: u64) -> Prepare {
    let sequence = PACKET_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    Prepare {
        amount,
        expires_at: Utc::now() + chrono::Duration::seconds(30),
        execution_condition: sha256(&FULFILLMENT),
        destination: destination.into(),
        data: Bytes::from(format!("hello {}", sequence)),
    }
}

/// Poll `condition` until it holds or `within` has passed.
pub async fn eventually<F: Fn() -> bool>(condition: F, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
