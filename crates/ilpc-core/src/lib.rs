//! # ILPC Core
//!
//! Shared building blocks for the ILPC connector:
//!
//! - **Packets**: ILP Prepare/Fulfill/Reject codec over OER
//! - **CCP / ILDCP**: peer protocol messages for routing and address assignment
//! - **Errors**: crate errors and ILP error codes
//! - **Accounts**: account registry, relations, and the plugin contract
//! - **Config**: TOML connector configuration
//! - **Rate**: exact exchange-rate arithmetic

pub mod accounts;
pub mod ccp;
pub mod config;
pub mod error;
pub mod hashing;
pub mod ildcp;
pub mod memory;
pub mod oer;
pub mod packet;
pub mod plugin;
pub mod rate;
pub mod types;

// Re-exports for convenience.
pub use accounts::{Account, Accounts, AccountStatus};
pub use config::{BackendKind, ConnectorConfig, Environment, MiddlewareKind, StaticRoute};
pub use error::{CoreError, ErrorCode, IlpError, PluginError};
pub use memory::MemoryPlugin;
pub use packet::{Fulfill, Packet, PacketType, Prepare, Reject};
pub use plugin::{DataHandler, MoneyHandler, Plugin, PluginEvent};
pub use rate::Rate;
pub use types::{AccountInfo, BalanceSettings, Relation};
