//! Registry of accounts and this connector's own address.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::CoreError;
use crate::ildcp::{self, IldcpResponse};
use crate::plugin::Plugin;
use crate::types::{AccountInfo, Relation};

/// Placeholder address until one is configured or fetched from a parent.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// A configured account and its transport.
#[derive(Clone)]
pub struct Account {
    pub info: AccountInfo,
    pub plugin: Arc<dyn Plugin>,
}

/// Snapshot of one account for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub id: String,
    pub relation: Relation,
    pub asset_code: String,
    pub asset_scale: u8,
    pub connected: bool,
}

pub struct Accounts {
    accounts: DashMap<String, Account>,
    address: RwLock<String>,
}

impl Accounts {
    pub fn new(address: Option<String>) -> Self {
        Self {
            accounts: DashMap::new(),
            address: RwLock::new(address.unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())),
        }
    }

    pub fn own_address(&self) -> String {
        self.address.read().clone()
    }

    pub fn set_own_address(&self, address: impl Into<String>) {
        let address = address.into();
        tracing::info!(address = %address, "set own ilp address");
        *self.address.write() = address;
    }

    /// Register an account. Fails if the id is taken.
    pub fn add(&self, id: &str, info: AccountInfo, plugin: Arc<dyn Plugin>) -> Result<(), CoreError> {
        match self.accounts.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(CoreError::DuplicateAccount(id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::debug!(account_id = %id, relation = %info.relation, "add account");
                slot.insert(Account { info, plugin });
                Ok(())
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<Account> {
        self.accounts.remove(id).map(|(_, account)| account)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.accounts.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Result<Account, CoreError> {
        self.accounts
            .get(id)
            .map(|a| a.value().clone())
            .ok_or_else(|| CoreError::UnknownAccount(id.to_string()))
    }

    pub fn info(&self, id: &str) -> Result<AccountInfo, CoreError> {
        self.get(id).map(|a| a.info)
    }

    pub fn plugin(&self, id: &str) -> Result<Arc<dyn Plugin>, CoreError> {
        self.get(id).map(|a| a.plugin)
    }

    /// All account ids, sorted.
    pub fn account_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.accounts.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Relation of an account. The empty id and unknown ids are `Local`.
    pub fn relation(&self, id: &str) -> Relation {
        if id.is_empty() {
            return Relation::Local;
        }
        self.accounts
            .get(id)
            .map(|a| a.info.relation)
            .unwrap_or(Relation::Local)
    }

    /// Ids of all parent accounts, sorted.
    pub fn parent_ids(&self) -> Vec<String> {
        self.account_ids()
            .into_iter()
            .filter(|id| self.relation(id) == Relation::Parent)
            .collect()
    }

    /// Address allocated to a child account under our own address.
    pub fn child_address(&self, id: &str) -> Result<String, CoreError> {
        let info = self.info(id)?;
        if info.relation != Relation::Child {
            return Err(CoreError::NotAChild(id.to_string()));
        }
        let segment = info.ilp_address_segment.as_deref().unwrap_or(id);
        Ok(format!("{}.{}", self.own_address(), segment))
    }

    /// Connect every plugin. Returns the first failure.
    pub async fn connect_all(&self) -> Result<(), CoreError> {
        let plugins: Vec<(String, Arc<dyn Plugin>)> = self
            .accounts
            .iter()
            .map(|e| (e.key().clone(), e.value().plugin.clone()))
            .collect();
        let results = futures::future::join_all(plugins.iter().map(|(id, plugin)| async move {
            let result = plugin.connect().await;
            if let Err(e) = &result {
                tracing::warn!(account_id = %id, error = %e, "plugin failed to connect");
            }
            result
        }))
        .await;
        results.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }

    /// Disconnect every plugin, logging failures.
    pub async fn disconnect_all(&self) {
        let plugins: Vec<(String, Arc<dyn Plugin>)> = self
            .accounts
            .iter()
            .map(|e| (e.key().clone(), e.value().plugin.clone()))
            .collect();
        for (id, plugin) in plugins {
            if let Err(e) = plugin.disconnect().await {
                tracing::warn!(account_id = %id, error = %e, "plugin failed to disconnect");
            }
        }
    }

    /// Make sure we have an address, asking the first parent over ILDCP
    /// if none was configured.
    pub async fn load_ilp_address(&self) -> Result<String, CoreError> {
        let current = self.own_address();
        if current != UNKNOWN_ADDRESS {
            return Ok(current);
        }
        let parent = self.parent_ids().into_iter().next().ok_or_else(|| {
            CoreError::InvalidConfig("no ilp address configured and no parent to ask".into())
        })?;
        tracing::info!(parent = %parent, "requesting ilp address from parent");
        let plugin = self.plugin(&parent)?;
        plugin.connect().await?;
        let raw = plugin.send_data(ildcp::request_bytes()).await?;
        let response = IldcpResponse::from_fulfill_bytes(&raw)?;
        self.set_own_address(response.client_address.clone());
        Ok(response.client_address)
    }

    pub fn status(&self) -> Vec<AccountStatus> {
        self.account_ids()
            .into_iter()
            .filter_map(|id| {
                let account = self.get(&id).ok()?;
                Some(AccountStatus {
                    connected: account.plugin.is_connected(),
                    relation: account.info.relation,
                    asset_code: account.info.asset_code,
                    asset_scale: account.info.asset_scale,
                    id,
                })
            })
            .collect()
    }
}
