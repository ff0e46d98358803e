//! The connector orchestrator: wires accounts, routing, middleware and the
//! packet dispatcher together and drives their lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ilpc_core::{AccountInfo, AccountStatus, Accounts, BackendKind, ConnectorConfig, Plugin};
use ilpc_middleware::{Alert, BalanceStatus, MiddlewareManager, Sample, Stats};
use ilpc_routing::{BroadcasterConfig, BroadcasterStatus, ForwardingRoutingTable, RouteBroadcaster, RoutingTable};
use serde::Serialize;

use crate::dispatcher::Core;
use crate::rate_backend::{OneToOneBackend, RateBackend};
use crate::route_builder::{RouteBuilder, RouteBuilderConfig};

/// Everything an operator might want to look at.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorStatus {
    pub address: String,
    pub version: &'static str,
    pub accounts: Vec<AccountStatus>,
    pub middlewares: Vec<String>,
    pub routing: BroadcasterStatus,
    pub balances: Option<BalanceStatus>,
    pub alerts: Vec<Alert>,
    pub stats: Vec<Sample>,
}

pub struct Connector {
    config: ConnectorConfig,
    accounts: Arc<Accounts>,
    backend: Arc<dyn RateBackend>,
    broadcaster: Arc<RouteBroadcaster>,
    route_builder: Arc<RouteBuilder>,
    manager: MiddlewareManager,
}

impl Connector {
    /// Build a connector from its config and one plugin per configured
    /// account.
    pub fn new(config: ConnectorConfig, mut plugins: HashMap<String, Arc<dyn Plugin>>) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let accounts = Arc::new(Accounts::new(config.ilp_address.clone()));
        for (id, info) in &config.accounts {
            let plugin = plugins
                .remove(id)
                .ok_or_else(|| anyhow!("no plugin supplied for account. accountId={}", id))?;
            accounts.add(id, info.clone(), plugin)?;
        }
        for id in plugins.keys() {
            tracing::warn!(account_id = %id, "ignoring plugin for unconfigured account");
        }

        let backend: Arc<dyn RateBackend> = match config.backend {
            BackendKind::OneToOne => Arc::new(OneToOneBackend::new(accounts.clone(), config.spread_rate()?)),
        };

        let routing_table = Arc::new(RoutingTable::new());
        let forwarding_table = Arc::new(ForwardingRoutingTable::new());
        let broadcaster = Arc::new(RouteBroadcaster::new(
            BroadcasterConfig::from_connector_config(&config)?,
            accounts.clone(),
            routing_table.clone(),
            forwarding_table,
        ));
        let route_builder = Arc::new(RouteBuilder::new(
            accounts.clone(),
            routing_table,
            backend.clone(),
            RouteBuilderConfig::from_connector_config(&config),
        ));
        let core = Arc::new(Core::new(
            accounts.clone(),
            route_builder.clone(),
            backend.clone(),
            broadcaster.clone(),
        ));
        let manager = MiddlewareManager::new(&config, accounts.clone(), Arc::new(Stats::new()), core)?;

        tracing::info!(accounts = config.accounts.len(), env = ?config.env, "connector created");
        Ok(Self {
            config,
            accounts,
            backend,
            broadcaster,
            route_builder,
            manager,
        })
    }

    pub fn accounts(&self) -> &Arc<Accounts> {
        &self.accounts
    }

    pub fn broadcaster(&self) -> &Arc<RouteBroadcaster> {
        &self.broadcaster
    }

    pub fn route_builder(&self) -> &Arc<RouteBuilder> {
        &self.route_builder
    }

    pub fn manager(&self) -> &MiddlewareManager {
        &self.manager
    }

    /// Bring the connector up: backend, pipelines, address, routing, then
    /// plugin connections and middleware startup.
    pub async fn listen(&self) -> Result<()> {
        self.backend.connect().await.context("failed to connect rate backend")?;
        self.manager.setup().await?;
        let address = self.accounts.load_ilp_address().await?;
        self.broadcaster.start();

        let connect_timeout = Duration::from_millis(self.config.initial_connect_timeout_ms);
        match tokio::time::timeout(connect_timeout, self.accounts.connect_all()).await {
            Ok(result) => result?,
            Err(_) => tracing::warn!(
                "one or more accounts failed to connect within the time limit, continuing anyway."
            ),
        }

        self.manager.startup().await?;
        tracing::info!(address = %address, version = env!("CARGO_PKG_VERSION"), "connector ready");
        Ok(())
    }

    /// Attach a new account at runtime.
    pub async fn add_account(&self, id: &str, info: AccountInfo, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.accounts.add(id, info, plugin.clone())?;
        self.manager.add_plugin(id).await?;
        plugin.connect().await?;
        self.broadcaster.track(id);
        self.broadcaster.reload_local_routes();
        tracing::info!(account_id = %id, "added account");
        Ok(())
    }

    /// Detach an account and forget it.
    pub async fn remove_account(&self, id: &str) -> Result<()> {
        let plugin = self.accounts.plugin(id)?;
        self.manager.remove_plugin(id).await?;
        plugin.disconnect().await?;
        self.broadcaster.untrack(id);
        self.accounts.remove(id);
        self.broadcaster.reload_local_routes();
        tracing::info!(account_id = %id, "removed account");
        Ok(())
    }

    pub async fn shutdown(&self) {
        tracing::info!("shutting down connector");
        self.broadcaster.stop();
        self.accounts.disconnect_all().await;
    }

    pub fn status(&self) -> ConnectorStatus {
        ConnectorStatus {
            address: self.accounts.own_address(),
            version: env!("CARGO_PKG_VERSION"),
            accounts: self.accounts.status(),
            middlewares: self
                .manager
                .middleware_names()
                .into_iter()
                .map(String::from)
                .collect(),
            routing: self.broadcaster.status(),
            balances: self.manager.balance().map(|b| b.status()),
            alerts: self.manager.alert().map(|a| a.alerts()).unwrap_or_default(),
            stats: self.manager.stats().snapshot(),
        }
    }
}
