//! ILPC Node: the packet-forwarding side of the connector.
//!
//! This crate provides:
//! - [`Connector`]: builds every component from a [`ConnectorConfig`](ilpc_core::ConnectorConfig)
//!   and drives startup, account changes and shutdown.
//! - [`Core`]: dispatches packets that passed the incoming pipeline.
//! - [`RouteBuilder`]: next-hop choice, amount conversion and expiry.
//! - [`RateBackend`] / [`OneToOneBackend`]: exchange rates.
//! - [`controllers`]: prepare forwarding, peer protocols (ILDCP, CCP) and echo.

pub mod connector;
pub mod controllers;
pub mod dispatcher;
pub mod error;
pub mod rate_backend;
pub mod route_builder;

// Re-exports for convenience.
pub use connector::{Connector, ConnectorStatus};
pub use dispatcher::Core;
pub use error::BackendError;
pub use rate_backend::{OneToOneBackend, PacketParams, PaymentParams, RateBackend};
pub use route_builder::{RouteBuilder, RouteBuilderConfig};
