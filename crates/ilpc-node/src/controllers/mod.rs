//! Handlers for incoming prepares, by destination.

pub mod ccp;
pub mod echo;
pub mod ildcp;
pub mod peer_protocol;
pub mod prepare;

pub use ccp::CcpController;
pub use echo::EchoController;
pub use ildcp::IldcpHostController;
pub use peer_protocol::PeerProtocolController;
pub use prepare::PrepareController;
