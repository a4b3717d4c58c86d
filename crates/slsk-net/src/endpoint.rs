//! A peer's resolved network address, and the cache collaborator that
//! resolves/remembers it.

use async_trait::async_trait;
use std::net::IpAddr;

/// A peer's advertised listening address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// IPv4 or IPv6 address, as reported by the server.
    pub ip: IpAddr,
    /// Listening port; `0` means the peer did not declare one and is
    /// unreachable except via server-mediated `ConnectToPeer` invitation.
    pub port: u16,
}

impl Endpoint {
    /// Whether this endpoint can be dialed directly (non-zero port).
    #[must_use]
    pub fn is_dialable(&self) -> bool {
        self.port != 0
    }
}

/// Resolves and caches peer endpoints, decoupling the connection manager
/// from how a deployment chooses to look addresses up: this is one of the
/// collaborator traits a [`crate::PeerConnectionManager`] is built against
/// rather than a concrete implementation it owns.
#[async_trait]
pub trait EndpointCache: Send + Sync {
    /// Return a cached endpoint for `username`, if one is known.
    async fn get(&self, username: &str) -> Option<Endpoint>;

    /// Remember a resolved endpoint for `username`.
    async fn put(&self, username: &str, endpoint: Endpoint);

    /// Forget a cached endpoint, e.g. after a dial against it fails.
    async fn invalidate(&self, username: &str);
}
