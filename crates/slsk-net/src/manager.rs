//! The registry of live peer connections, and the single-flight dial lock
//! that keeps two tasks from opening redundant connections to the same
//! user at once.

use crate::connection::{ConnectionType, PeerConnection};
use crate::endpoint::EndpointCache;
use crate::error::NetError;
use crate::handshake;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};

/// Tracks one connection per username and serializes concurrent dial
/// attempts to the same user.
///
/// The per-user semaphore map follows the "ensure present before acquire,
/// clean up on empty" discipline: a task always inserts its semaphore (or
/// finds one already there) before acquiring it, and after releasing,
/// removes the entry only if no one else grabbed a reference in the
/// meantime. This avoids the race where a semaphore is removed out from
/// under a task that is about to wait on it.
pub struct PeerConnectionManager {
    connections: DashMap<String, Arc<Mutex<PeerConnection>>>,
    dial_locks: DashMap<String, Arc<Semaphore>>,
    endpoint_cache: Arc<dyn EndpointCache>,
    own_username: String,
}

impl PeerConnectionManager {
    /// Build a manager for `own_username`, resolving peer endpoints through
    /// `endpoint_cache`.
    #[must_use]
    pub fn new(own_username: impl Into<String>, endpoint_cache: Arc<dyn EndpointCache>) -> Self {
        Self {
            connections: DashMap::new(),
            dial_locks: DashMap::new(),
            endpoint_cache,
            own_username: own_username.into(),
        }
    }

    /// Return the existing connection to `username`, or dial and hand-shake
    /// a new one.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::NoEndpoint`] if no address is cached for
    /// `username`, or any I/O/handshake failure from the dial itself.
    pub async fn get_or_dial(&self, username: &str) -> Result<Arc<Mutex<PeerConnection>>, NetError> {
        if let Some(existing) = self.connections.get(username) {
            return Ok(existing.clone());
        }

        let lock = self
            .dial_locks
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();
        let _permit = lock.acquire().await.expect("semaphore never closed");

        if let Some(existing) = self.connections.get(username) {
            self.cleanup_dial_lock(username, &lock);
            return Ok(existing.clone());
        }

        let endpoint = self
            .endpoint_cache
            .get(username)
            .await
            .ok_or_else(|| NetError::NoEndpoint(username.to_string()))?;
        if !endpoint.is_dialable() {
            self.cleanup_dial_lock(username, &lock);
            return Err(NetError::NoEndpoint(username.to_string()));
        }

        let result = self.dial(username, endpoint, ConnectionType::PeerToPeer, None).await;
        self.cleanup_dial_lock(username, &lock);

        let conn = result.map_err(|e| {
            if matches!(e, NetError::Io(_) | NetError::HandshakeTimeout { .. }) {
                let cache = self.endpoint_cache.clone();
                let username = username.to_string();
                tokio::spawn(async move { cache.invalidate(&username).await });
            }
            e
        })?;

        let handle = Arc::new(Mutex::new(conn));
        self.connections.insert(username.to_string(), handle.clone());
        Ok(handle)
    }

    async fn dial(
        &self,
        username: &str,
        endpoint: crate::endpoint::Endpoint,
        connection_type: ConnectionType,
        token: Option<u32>,
    ) -> Result<PeerConnection, NetError> {
        let mut stream = TcpStream::connect((endpoint.ip, endpoint.port)).await?;
        let token = token.unwrap_or_else(rand::random);
        handshake::peer_init(&mut stream, &self.own_username, connection_type, token).await?;
        Ok(PeerConnection::new(stream, username.to_string(), connection_type))
    }

    /// Open a fresh, standalone raw transfer connection to `username` under
    /// `token`, the correlation token already agreed in a
    /// `TransferRequest`/`TransferResponse` exchange on the peer-message
    /// channel. Unlike [`Self::get_or_dial`] this is never reused or tracked
    /// in the connection table: each transfer gets its own socket.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::NoEndpoint`] if no address is cached for
    /// `username`, or any I/O/handshake failure from the dial itself.
    pub async fn dial_transfer(&self, username: &str, token: u32) -> Result<PeerConnection, NetError> {
        let endpoint = self
            .endpoint_cache
            .get(username)
            .await
            .ok_or_else(|| NetError::NoEndpoint(username.to_string()))?;
        if !endpoint.is_dialable() {
            return Err(NetError::NoEndpoint(username.to_string()));
        }
        self.dial(username, endpoint, ConnectionType::FileTransfer, Some(token)).await
    }

    fn cleanup_dial_lock(&self, username: &str, lock: &Arc<Semaphore>) {
        // Remove the entry only if we hold the last reference besides the
        // map's own; otherwise another waiter is still relying on it.
        if Arc::strong_count(lock) <= 2 {
            self.dial_locks.remove_if(username, |_, v| Arc::ptr_eq(v, lock));
        }
    }

    /// Register a connection accepted from an inbound dial (after the
    /// handshake determined the remote's identity).
    pub fn register_incoming(&self, username: String, connection: PeerConnection) -> Arc<Mutex<PeerConnection>> {
        let handle = Arc::new(Mutex::new(connection));
        self.connections.insert(username, handle.clone());
        handle
    }

    /// Drop the tracked connection for `username`, if any.
    pub fn remove(&self, username: &str) {
        self.connections.remove(username);
    }

    /// Number of peers with a live tracked connection.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex as StdMutex;

    struct StaticCache(StdMutex<Option<Endpoint>>);

    #[async_trait]
    impl EndpointCache for StaticCache {
        async fn get(&self, _username: &str) -> Option<Endpoint> {
            *self.0.lock().unwrap()
        }
        async fn put(&self, _username: &str, endpoint: Endpoint) {
            *self.0.lock().unwrap() = Some(endpoint);
        }
        async fn invalidate(&self, _username: &str) {
            *self.0.lock().unwrap() = None;
        }
    }

    #[tokio::test]
    async fn no_endpoint_fails_fast() {
        let cache = Arc::new(StaticCache(StdMutex::new(None)));
        let manager = PeerConnectionManager::new("me", cache);
        let err = manager.get_or_dial("bob").await.unwrap_err();
        assert!(matches!(err, NetError::NoEndpoint(_)));
    }

    #[tokio::test]
    async fn registered_incoming_connection_is_reused() {
        let cache = Arc::new(StaticCache(StdMutex::new(None)));
        let manager = PeerConnectionManager::new("me", cache);

        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_side, _) = listener.accept().await.unwrap();
        let _ = client.await.unwrap();

        let conn = PeerConnection::new(server_side, "bob".into(), ConnectionType::PeerToPeer);
        manager.register_incoming("bob".into(), conn);
        assert_eq!(manager.connection_count(), 1);

        let fetched = manager.get_or_dial("bob").await.unwrap();
        assert_eq!(fetched.lock().await.username(), "bob");
    }

    #[test]
    fn endpoint_dialable() {
        let e = Endpoint {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        };
        assert!(!e.is_dialable());
    }
}
