//! The parent/child tree itself.
//!
//! A client without a parent starts a promotion timer; if no parent is
//! adopted before it elapses, the client declares itself a branch root.
//! Adopting a parent at any point cancels the timer and, if the client had
//! already promoted itself, demotes it back to a regular branch member.

use crate::error::DistributedError;
use crate::events::DistributedEvent;
use dashmap::DashMap;
use slsk_core::codes::distributed::SEARCH_REQUEST;
use slsk_net::PeerConnection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// The currently adopted parent, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentInfo {
    /// The parent's username.
    pub username: String,
    /// The username of the root of the branch the parent reports.
    pub branch_root: String,
    /// The parent's own branch level; this client's level is one more.
    pub branch_level: u32,
}

struct Inner {
    own_username: String,
    parent: RwLock<Option<ParentInfo>>,
    is_branch_root: AtomicBool,
    children: DashMap<String, Arc<Mutex<PeerConnection>>>,
    child_limit: usize,
    events: broadcast::Sender<DistributedEvent>,
    promotion_delay: Duration,
    promotion_token: Mutex<Option<CancellationToken>>,
}

/// Maintains this client's position in the distributed search tree.
///
/// Cheap to clone; clones share the same underlying state, matching the
/// handle-style sharing used by the connection manager in `slsk-net`.
#[derive(Clone)]
pub struct DistributedOverlay {
    inner: Arc<Inner>,
}

impl DistributedOverlay {
    /// Build a fresh overlay with no parent and no children. `promotion_delay`
    /// controls how long to wait for a parent before self-promoting to
    /// branch root; `child_limit` caps how many children [`Self::add_child`]
    /// will accept.
    #[must_use]
    pub fn new(own_username: impl Into<String>, promotion_delay: Duration, child_limit: usize) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        let overlay = Self {
            inner: Arc::new(Inner {
                own_username: own_username.into(),
                parent: RwLock::new(None),
                is_branch_root: AtomicBool::new(false),
                children: DashMap::new(),
                child_limit,
                events: tx,
                promotion_delay,
                promotion_token: Mutex::new(None),
            }),
        };
        overlay.schedule_promotion();
        overlay
    }

    /// Subscribe to tree-shape change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DistributedEvent> {
        self.inner.events.subscribe()
    }

    /// This client's own username.
    #[must_use]
    pub fn own_username(&self) -> &str {
        &self.inner.own_username
    }

    /// Whether this client currently has no parent and declared itself a
    /// branch root.
    #[must_use]
    pub fn is_branch_root(&self) -> bool {
        self.inner.is_branch_root.load(Ordering::Acquire)
    }

    /// This client's depth in the tree: the parent's depth plus one, or
    /// zero if this client is a branch root.
    pub async fn branch_level(&self) -> u32 {
        match &*self.inner.parent.read().await {
            Some(parent) => parent.branch_level + 1,
            None => 0,
        }
    }

    /// Adopt `username` as parent, reporting `branch_root` as the root of
    /// its branch.
    ///
    /// # Errors
    ///
    /// Returns [`DistributedError::AlreadyHasParent`] if a parent is
    /// already adopted; the caller must disconnect it first.
    pub async fn adopt_parent(
        &self,
        username: impl Into<String>,
        branch_root: impl Into<String>,
        branch_level: u32,
    ) -> Result<(), DistributedError> {
        let mut guard = self.inner.parent.write().await;
        if let Some(existing) = &*guard {
            return Err(DistributedError::AlreadyHasParent(existing.username.clone()));
        }

        self.cancel_promotion().await;
        let username = username.into();
        let branch_root = branch_root.into();
        *guard = Some(ParentInfo {
            username: username.clone(),
            branch_root: branch_root.clone(),
            branch_level,
        });
        drop(guard);

        let was_root = self.inner.is_branch_root.swap(false, Ordering::AcqRel);
        let _ = self.inner.events.send(DistributedEvent::ParentAdopted {
            username: username.clone(),
            branch_root,
        });
        if was_root {
            let _ = self
                .inner
                .events
                .send(DistributedEvent::DemotedFromBranchRoot { username });
        }
        Ok(())
    }

    /// Clear the current parent, if any, and restart the promotion timer.
    pub async fn parent_disconnected(&self) {
        let mut guard = self.inner.parent.write().await;
        let Some(parent) = guard.take() else {
            return;
        };
        drop(guard);
        let _ = self
            .inner
            .events
            .send(DistributedEvent::ParentDisconnected { username: parent.username });
        self.schedule_promotion();
    }

    /// Track a newly accepted or adopted child connection.
    ///
    /// # Errors
    ///
    /// Returns [`DistributedError::ChildLimitReached`] if accepting this
    /// child would exceed the configured limit.
    pub fn add_child(&self, username: impl Into<String>, connection: PeerConnection) -> Result<(), DistributedError> {
        if self.inner.children.len() >= self.inner.child_limit {
            return Err(DistributedError::ChildLimitReached);
        }
        let username = username.into();
        self.inner
            .children
            .insert(username.clone(), Arc::new(Mutex::new(connection)));
        let _ = self.inner.events.send(DistributedEvent::ChildAdded { username });
        Ok(())
    }

    /// Stop tracking a child.
    ///
    /// # Errors
    ///
    /// Returns [`DistributedError::UnknownChild`] if `username` is not
    /// currently tracked.
    pub fn remove_child(&self, username: &str) -> Result<(), DistributedError> {
        self.inner
            .children
            .remove(username)
            .ok_or_else(|| DistributedError::UnknownChild(username.to_string()))?;
        let _ = self.inner.events.send(DistributedEvent::ChildDisconnected {
            username: username.to_string(),
        });
        Ok(())
    }

    /// Number of tracked children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.children.len()
    }

    /// Forward a search request payload to every tracked child, pruning
    /// any whose connection has gone bad.
    pub async fn forward_search(&self, payload: &[u8]) {
        let children: Vec<(String, Arc<Mutex<PeerConnection>>)> = self
            .inner
            .children
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (username, conn) in children {
            let mut guard = conn.lock().await;
            let result = guard.send(SEARCH_REQUEST, payload).await;
            drop(guard);
            if result.is_err() {
                tracing::debug!(%username, "dropping unresponsive distributed child");
                let _ = self.remove_child(&username);
            }
        }
    }

    /// Clear all parent and child state, e.g. after a server reconnect,
    /// and restart the promotion timer.
    pub async fn reset(&self) {
        *self.inner.parent.write().await = None;
        self.inner.children.clear();
        self.inner.is_branch_root.store(false, Ordering::Release);
        self.cancel_promotion().await;
        let _ = self.inner.events.send(DistributedEvent::DistributedNetworkReset);
        self.schedule_promotion();
    }

    async fn cancel_promotion(&self) {
        if let Some(token) = self.inner.promotion_token.lock().await.take() {
            token.cancel();
        }
    }

    fn schedule_promotion(&self) {
        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let child_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(inner.promotion_delay) => {
                    if inner.parent.read().await.is_none() {
                        inner.is_branch_root.store(true, Ordering::Release);
                        let _ = inner.events.send(DistributedEvent::PromotedToBranchRoot);
                    }
                }
                _ = child_token.cancelled() => {}
            }
        });
        // Replacing without awaiting the previous task is fine: the old
        // token's cancellation check above already raced and lost, or it
        // is cancelled synchronously by whoever calls `cancel_promotion`
        // before installing a new one.
        if let Ok(mut guard) = self.inner.promotion_token.try_lock() {
            *guard = Some(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn self_promotes_after_delay_with_no_parent() {
        let overlay = DistributedOverlay::new("me", Duration::from_millis(20), 50);
        let mut events = overlay.subscribe();
        assert!(!overlay.is_branch_root());

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, DistributedEvent::PromotedToBranchRoot);
        assert!(overlay.is_branch_root());
    }

    #[tokio::test]
    async fn adopting_parent_before_delay_prevents_promotion() {
        let overlay = DistributedOverlay::new("me", Duration::from_millis(100), 50);
        let mut events = overlay.subscribe();

        overlay.adopt_parent("root_user", "root_user", 0).await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            DistributedEvent::ParentAdopted {
                username: "root_user".into(),
                branch_root: "root_user".into(),
            }
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!overlay.is_branch_root());
    }

    #[tokio::test]
    async fn duplicate_parent_adoption_is_rejected() {
        let overlay = DistributedOverlay::new("me", Duration::from_secs(5), 50);
        overlay.adopt_parent("a", "a", 0).await.unwrap();
        let err = overlay.adopt_parent("b", "b", 0).await.unwrap_err();
        assert!(matches!(err, DistributedError::AlreadyHasParent(u) if u == "a"));
    }

    #[tokio::test]
    async fn parent_disconnect_restarts_promotion_timer() {
        let overlay = DistributedOverlay::new("me", Duration::from_millis(30), 50);
        overlay.adopt_parent("a", "a", 0).await.unwrap();
        let mut events = overlay.subscribe();

        overlay.parent_disconnected().await;
        let event = events.recv().await.unwrap();
        assert_eq!(event, DistributedEvent::ParentDisconnected { username: "a".into() });

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, DistributedEvent::PromotedToBranchRoot);
    }

    #[tokio::test]
    async fn remove_unknown_child_errors() {
        let overlay = DistributedOverlay::new("me", Duration::from_secs(5), 50);
        let err = overlay.remove_child("ghost").unwrap_err();
        assert!(matches!(err, DistributedError::UnknownChild(u) if u == "ghost"));
    }

    #[tokio::test]
    async fn branch_level_follows_parent() {
        let overlay = DistributedOverlay::new("me", Duration::from_secs(5), 50);
        assert_eq!(overlay.branch_level().await, 0);
        overlay.adopt_parent("a", "root", 3).await.unwrap();
        assert_eq!(overlay.branch_level().await, 4);
    }
}
