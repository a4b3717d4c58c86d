//! # slsk-net
//!
//! Peer connection lifecycle: dialing, accepting, the NAT-traversal
//! handshake, and the registry of live peer connections.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod manager;

pub use connection::{ConnectionType, PeerConnection};
pub use endpoint::{Endpoint, EndpointCache};
pub use error::NetError;
pub use handshake::{peer_init, pierce_firewall, read_handshake, HandshakeOutcome};
pub use manager::PeerConnectionManager;
