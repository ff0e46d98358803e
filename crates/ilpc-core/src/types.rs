use std::fmt;

use serde::{Deserialize, Serialize};

/// Relationship between this connector and an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Parent,
    Peer,
    Child,
    /// This connector itself. Never configured; used for the own address
    /// and for unknown next hops.
    Local,
}

impl Relation {
    /// Route preference of a next hop with this relation. Lower wins.
    pub fn priority(&self) -> u8 {
        match self {
            Relation::Parent => 0,
            Relation::Peer => 1,
            Relation::Child => 2,
            Relation::Local => 3,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Parent => write!(f, "parent"),
            Relation::Peer => write!(f, "peer"),
            Relation::Child => write!(f, "child"),
            Relation::Local => write!(f, "local"),
        }
    }
}

/// Balance limits and settlement trigger for an account. Positive balances
/// mean the account owes us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSettings {
    /// Lower bound. `None` means unbounded.
    #[serde(default)]
    pub minimum: Option<i64>,
    pub maximum: i64,
    /// Settle when the balance falls below this.
    #[serde(default)]
    pub settle_threshold: Option<i64>,
    #[serde(default)]
    pub settle_to: i64,
}

fn default_rate_limit_refill_period_ms() -> u64 {
    60_000
}

fn default_rate_limit_refill_count() -> u64 {
    10_000
}

/// Packet-count token bucket for incoming traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_rate_limit_refill_period_ms")]
    pub refill_period_ms: u64,
    #[serde(default = "default_rate_limit_refill_count")]
    pub refill_count: u64,
    /// Defaults to `refill_count`.
    #[serde(default)]
    pub capacity: Option<u64>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            refill_period_ms: default_rate_limit_refill_period_ms(),
            refill_count: default_rate_limit_refill_count(),
            capacity: None,
        }
    }
}

fn default_throughput_refill_period_ms() -> u64 {
    1_000
}

/// Amount-per-period limits. Each direction is unlimited when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughputSettings {
    #[serde(default = "default_throughput_refill_period_ms")]
    pub refill_period_ms: u64,
    #[serde(default)]
    pub incoming_amount: Option<u64>,
    #[serde(default)]
    pub outgoing_amount: Option<u64>,
}

impl Default for ThroughputSettings {
    fn default() -> Self {
        Self {
            refill_period_ms: default_throughput_refill_period_ms(),
            incoming_amount: None,
            outgoing_amount: None,
        }
    }
}

fn default_dedup_interval_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicateSettings {
    #[serde(default = "default_dedup_interval_ms")]
    pub cleanup_interval_ms: u64,
    #[serde(default = "default_dedup_interval_ms")]
    pub packet_lifetime_ms: u64,
}

impl Default for DeduplicateSettings {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: default_dedup_interval_ms(),
            packet_lifetime_ms: default_dedup_interval_ms(),
        }
    }
}

/// Static description of an account, as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub relation: Relation,
    pub asset_code: String,
    pub asset_scale: u8,
    #[serde(default)]
    pub balance: Option<BalanceSettings>,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub throughput: ThroughputSettings,
    #[serde(default)]
    pub max_packet_amount: Option<u64>,
    #[serde(default)]
    pub deduplicate: DeduplicateSettings,
    /// Child address segment. Defaults to the account id.
    #[serde(default)]
    pub ilp_address_segment: Option<String>,
    #[serde(default)]
    pub send_routes: Option<bool>,
    #[serde(default)]
    pub receive_routes: Option<bool>,
}

impl AccountInfo {
    /// Minimal account with defaults for everything but identity.
    pub fn new(relation: Relation, asset_code: impl Into<String>, asset_scale: u8) -> Self {
        Self {
            relation,
            asset_code: asset_code.into(),
            asset_scale,
            balance: None,
            rate_limit: RateLimitSettings::default(),
            throughput: ThroughputSettings::default(),
            max_packet_amount: None,
            deduplicate: DeduplicateSettings::default(),
            ilp_address_segment: None,
            send_routes: None,
            receive_routes: None,
        }
    }

    /// Whether routes are advertised to this account.
    pub fn sends_routes(&self) -> bool {
        self.send_routes.unwrap_or(self.relation != Relation::Child)
    }

    /// Whether routes from this account are accepted.
    pub fn receives_routes(&self) -> bool {
        self.receive_routes.unwrap_or(self.relation != Relation::Child)
    }
}
