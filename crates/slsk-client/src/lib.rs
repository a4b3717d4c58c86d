//! # slsk-client
//!
//! Wires the rest of the workspace into a single [`SoulseekClient`] facade:
//! the server login handshake, configuration, the collaborator traits a
//! deployment must supply, and the event stream a caller observes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod tokens;
pub mod transfer_wire;

pub use client::SoulseekClient;
pub use collab::{
    ClientInfo, ClientInfoProvider, EndpointCache, FolderContentsProvider, Governor, ImmediateSlotAwaiter,
    PerUserSlotAwaiter, QueueResolver, SearchResponder, SharedFileProvider, SlotAwaiter,
};
pub use config::ClientConfig;
pub use error::ClientError;
pub use events::ClientEvent;
pub use session::{LoginResult, ServerSession};
pub use transfer_wire::{
    decode_transfer_request, decode_transfer_response, encode_transfer_request, encode_transfer_response,
    TransferDirection, TransferRequest, TransferResponse,
};
