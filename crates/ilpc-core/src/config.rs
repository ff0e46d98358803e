//! Connector configuration loading and validation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::rate::Rate;
use crate::types::{AccountInfo, Relation};

/// Deployment environment. Selects the global address prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Test,
}

impl Environment {
    pub fn global_prefix(&self) -> &'static str {
        match self {
            Environment::Production => "g",
            Environment::Test => "test",
        }
    }
}

/// Middleware implementations known to the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MiddlewareKind {
    ErrorHandler,
    RateLimit,
    MaxPacketAmount,
    Throughput,
    Balance,
    Deduplicate,
    Expire,
    ValidateFulfillment,
    Stats,
    Alert,
    /// Trace-level log of every packet. Not installed by default.
    PacketLog,
}

impl MiddlewareKind {
    /// Built-ins in installation order.
    pub const BUILTIN: [MiddlewareKind; 10] = [
        MiddlewareKind::ErrorHandler,
        MiddlewareKind::RateLimit,
        MiddlewareKind::MaxPacketAmount,
        MiddlewareKind::Throughput,
        MiddlewareKind::Balance,
        MiddlewareKind::Deduplicate,
        MiddlewareKind::Expire,
        MiddlewareKind::ValidateFulfillment,
        MiddlewareKind::Stats,
        MiddlewareKind::Alert,
    ];

    /// Name used for pipeline entries and in config.
    pub fn name(&self) -> &'static str {
        match self {
            MiddlewareKind::ErrorHandler => "error-handler",
            MiddlewareKind::RateLimit => "rate-limit",
            MiddlewareKind::MaxPacketAmount => "max-packet-amount",
            MiddlewareKind::Throughput => "throughput",
            MiddlewareKind::Balance => "balance",
            MiddlewareKind::Deduplicate => "deduplicate",
            MiddlewareKind::Expire => "expire",
            MiddlewareKind::ValidateFulfillment => "validate-fulfillment",
            MiddlewareKind::Stats => "stats",
            MiddlewareKind::Alert => "alert",
            MiddlewareKind::PacketLog => "packet-log",
        }
    }
}

impl fmt::Display for MiddlewareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A user-supplied middleware instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMiddleware {
    pub kind: MiddlewareKind,
}

/// Exchange-rate backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    OneToOne,
}

/// A configured route that overrides anything learned from peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub target_prefix: String,
    pub peer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Full connector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Own ILP address. When absent it is fetched from a parent over ILDCP.
    #[serde(default)]
    pub ilp_address: Option<String>,
    #[serde(default = "default_env")]
    pub env: Environment,
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountInfo>,
    #[serde(default)]
    pub routes: Vec<StaticRoute>,
    /// Account id for the global default route, or `auto` for the first parent.
    #[serde(default)]
    pub default_route: Option<String>,
    #[serde(default = "default_true")]
    pub route_broadcast_enabled: bool,
    #[serde(default = "default_route_broadcast_interval_ms")]
    pub route_broadcast_interval_ms: u64,
    #[serde(default = "default_route_expiry_ms")]
    pub route_expiry_ms: u64,
    #[serde(default = "default_min_message_window_ms")]
    pub min_message_window_ms: u64,
    #[serde(default = "default_max_hold_time_ms")]
    pub max_hold_time_ms: u64,
    #[serde(default = "default_true")]
    pub reflect_payments: bool,
    /// Base64-encoded 32-byte secret for route auth. Random when absent.
    #[serde(default)]
    pub routing_secret: Option<String>,
    #[serde(default)]
    pub backend: BackendKind,
    /// Fraction kept by the connector on every exchange, as a decimal string.
    #[serde(default = "default_spread")]
    pub spread: String,
    #[serde(default)]
    pub disable_middleware: Vec<MiddlewareKind>,
    #[serde(default)]
    pub middlewares: BTreeMap<String, CustomMiddleware>,
    #[serde(default = "default_initial_connect_timeout_ms")]
    pub initial_connect_timeout_ms: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default value functions
fn default_env() -> Environment {
    Environment::Production
}
fn default_true() -> bool {
    true
}
fn default_route_broadcast_interval_ms() -> u64 {
    30_000
}
fn default_route_expiry_ms() -> u64 {
    45_000
}
fn default_min_message_window_ms() -> u64 {
    1_000
}
fn default_max_hold_time_ms() -> u64 {
    30_000
}
fn default_spread() -> String {
    "0".into()
}
fn default_initial_connect_timeout_ms() -> u64 {
    10_000
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            ilp_address: None,
            env: default_env(),
            accounts: BTreeMap::new(),
            routes: Vec::new(),
            default_route: None,
            route_broadcast_enabled: true,
            route_broadcast_interval_ms: default_route_broadcast_interval_ms(),
            route_expiry_ms: default_route_expiry_ms(),
            min_message_window_ms: default_min_message_window_ms(),
            max_hold_time_ms: default_max_hold_time_ms(),
            reflect_payments: true,
            routing_secret: None,
            backend: BackendKind::default(),
            spread: default_spread(),
            disable_middleware: Vec::new(),
            middlewares: BTreeMap::new(),
            initial_connect_timeout_ms: default_initial_connect_timeout_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ConnectorConfig {
    /// Load config from a TOML file, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ConnectorConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn global_prefix(&self) -> &'static str {
        self.env.global_prefix()
    }

    /// Parsed spread as an exact rate.
    pub fn spread_rate(&self) -> Result<Rate, CoreError> {
        Rate::from_decimal_str(&self.spread)
    }

    /// Decode the configured routing secret, or generate a random one.
    pub fn routing_secret_bytes(&self) -> Result<[u8; 32], CoreError> {
        match &self.routing_secret {
            Some(encoded) => {
                let raw = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| CoreError::InvalidConfig(format!("routing_secret: {}", e)))?;
                <[u8; 32]>::try_from(raw.as_slice()).map_err(|_| {
                    CoreError::InvalidConfig(format!(
                        "routing_secret must be 32 bytes, got {}",
                        raw.len()
                    ))
                })
            }
            None => Ok(rand::random()),
        }
    }

    /// Check cross-field constraints. Run once at startup.
    pub fn validate(&self) -> Result<(), CoreError> {
        let has_parent = self
            .accounts
            .values()
            .any(|a| a.relation == Relation::Parent);
        if self.ilp_address.is_none() && !has_parent {
            return Err(CoreError::InvalidConfig(
                "ilp_address is required when there is no parent account".into(),
            ));
        }

        let spread = self.spread_rate()?;
        if !spread.is_unit_interval() {
            return Err(CoreError::InvalidConfig(format!(
                "spread must be between 0 and 1, got {}",
                self.spread
            )));
        }

        if let Some(default_route) = &self.default_route {
            if default_route != "auto" && !self.accounts.contains_key(default_route) {
                return Err(CoreError::InvalidConfig(format!(
                    "default_route refers to unknown account: {}",
                    default_route
                )));
            }
        }

        for (id, info) in &self.accounts {
            if let Some(balance) = &info.balance {
                if let Some(minimum) = balance.minimum {
                    if minimum > balance.maximum {
                        return Err(CoreError::InvalidConfig(format!(
                            "account {}: balance minimum {} exceeds maximum {}",
                            id, minimum, balance.maximum
                        )));
                    }
                }
            }
        }

        for name in self.middlewares.keys() {
            if MiddlewareKind::BUILTIN.iter().any(|k| k.name() == name) {
                return Err(CoreError::InvalidConfig(format!(
                    "custom middleware name collides with built-in: {}",
                    name
                )));
            }
        }

        if let Some(secret) = &self.routing_secret {
            if !secret.is_empty() {
                self.routing_secret_bytes()?;
            }
        }

        Ok(())
    }
}
