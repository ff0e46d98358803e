//! ILPC Routing: route tables and the CCP route exchange.
//!
//! This crate provides:
//! - [`PrefixMap`]: an ordered map with longest-prefix lookup over ILP addresses.
//! - [`RoutingTable`]: the local best route per prefix, used for forwarding.
//! - [`ForwardingRoutingTable`]: what we advertise, with its epoch-ordered update log.
//! - [`CcpSender`] / [`CcpReceiver`]: the two halves of a CCP session with one peer.
//! - [`RouteBroadcaster`]: owns the peers and recomputes best routes as they change.
//! - [`can_dragon_filter`]: suppression of routes already covered by a broader one.

pub mod broadcaster;
pub mod ccp_receiver;
pub mod ccp_sender;
pub mod dragon;
pub mod error;
pub mod peer;
pub mod prefix_map;
pub mod route;
pub mod routing_table;

// Re-exports for convenience.
pub use broadcaster::{BroadcasterConfig, BroadcasterStatus, RouteBroadcaster};
pub use ccp_receiver::{CcpReceiver, ReceiverStatus};
pub use ccp_sender::{CcpSender, SenderStatus};
pub use dragon::can_dragon_filter;
pub use error::RoutingError;
pub use peer::{Peer, PeerStatus, SenderTiming};
pub use prefix_map::PrefixMap;
pub use route::{compare_routes, Route, RouteUpdate};
pub use routing_table::{ForwardingRoutingTable, RoutingTable};
