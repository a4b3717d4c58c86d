//! The shared transfer registry.
//!
//! Holds only transfers considered active; a caller removes a session once
//! it reaches a terminal state. This keeps the registry's core invariant
//! cheap to enforce: at most one active transfer per `(username, filename)`
//! pair, regardless of how many tokens have been used historically.

use crate::error::TransferError;
use dashmap::DashMap;
use std::sync::Arc;

/// A token-keyed registry of transfer sessions, with a secondary index
/// rejecting a second concurrent transfer for the same `(username,
/// filename)` pair.
pub struct TransferRegistry<T> {
    by_token: DashMap<u32, Arc<T>>,
    by_file: DashMap<(String, String), u32>,
}

impl<T> TransferRegistry<T> {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_token: DashMap::new(),
            by_file: DashMap::new(),
        }
    }

    /// Register a new active session under `token`, keyed secondarily by
    /// `(username, filename)`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::DuplicateToken`] if `token` is already
    /// tracked, or [`TransferError::DuplicateTransfer`] if a session is
    /// already active for this `(username, filename)` pair.
    pub fn insert(
        &self,
        token: u32,
        username: &str,
        filename: &str,
        session: Arc<T>,
    ) -> Result<(), TransferError> {
        if self.by_token.contains_key(&token) {
            return Err(TransferError::DuplicateToken(token));
        }
        let key = (username.to_string(), filename.to_string());
        if let Some(existing) = self.by_file.get(&key) {
            return Err(TransferError::DuplicateTransfer(*existing));
        }
        self.by_file.insert(key, token);
        self.by_token.insert(token, session);
        Ok(())
    }

    /// Look up a session by its correlation token.
    #[must_use]
    pub fn get(&self, token: u32) -> Option<Arc<T>> {
        self.by_token.get(&token).map(|e| e.value().clone())
    }

    /// Remove a session, freeing its `(username, filename)` slot for a new
    /// transfer.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::UnknownTransfer`] if `token` is not tracked.
    pub fn remove(&self, token: u32) -> Result<Arc<T>, TransferError> {
        let (_, session) = self
            .by_token
            .remove(&token)
            .ok_or(TransferError::UnknownTransfer(token))?;
        self.by_file.retain(|_, v| *v != token);
        Ok(session)
    }

    /// Number of currently active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    /// Whether the registry holds no active sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Remove and return every active session, e.g. because the connection
    /// they all depend on has gone away. Leaves the registry empty.
    pub fn drain(&self) -> Vec<Arc<T>> {
        let sessions: Vec<Arc<T>> = self.by_token.iter().map(|e| e.value().clone()).collect();
        self.by_token.clear();
        self.by_file.clear();
        sessions
    }
}

impl<T> Default for TransferRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_active_transfer_for_same_file() {
        let registry: TransferRegistry<()> = TransferRegistry::new();
        registry.insert(1, "alice", "song.flac", Arc::new(())).unwrap();
        let err = registry.insert(2, "alice", "song.flac", Arc::new(())).unwrap_err();
        assert!(matches!(err, TransferError::DuplicateTransfer(1)));
    }

    #[test]
    fn rejects_duplicate_token() {
        let registry: TransferRegistry<()> = TransferRegistry::new();
        registry.insert(1, "alice", "song.flac", Arc::new(())).unwrap();
        let err = registry.insert(1, "bob", "other.flac", Arc::new(())).unwrap_err();
        assert!(matches!(err, TransferError::DuplicateToken(1)));
    }

    #[test]
    fn removal_frees_the_file_slot() {
        let registry: TransferRegistry<()> = TransferRegistry::new();
        registry.insert(1, "alice", "song.flac", Arc::new(())).unwrap();
        registry.remove(1).unwrap();
        registry.insert(2, "alice", "song.flac", Arc::new(())).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_files_are_independent() {
        let registry: TransferRegistry<()> = TransferRegistry::new();
        registry.insert(1, "alice", "a.flac", Arc::new(())).unwrap();
        registry.insert(2, "alice", "b.flac", Arc::new(())).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_unknown_token_errors() {
        let registry: TransferRegistry<()> = TransferRegistry::new();
        let err = registry.remove(42).unwrap_err();
        assert!(matches!(err, TransferError::UnknownTransfer(42)));
    }

    #[test]
    fn drain_empties_the_registry_and_returns_every_session() {
        let registry: TransferRegistry<()> = TransferRegistry::new();
        registry.insert(1, "alice", "a.flac", Arc::new(())).unwrap();
        registry.insert(2, "bob", "b.flac", Arc::new(())).unwrap();
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        registry.insert(3, "alice", "a.flac", Arc::new(())).unwrap();
    }
}
