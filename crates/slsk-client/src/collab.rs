//! Collaborator traits the client facade is built against rather than
//! owning concrete implementations of: endpoint resolution, transfer
//! throttling and slot admission, and the five queries a remote peer can
//! address at this client (browse, folder contents, client info, search
//! matching, queue position). A deployment answers these by implementing
//! the traits; the facade never inspects the local filesystem or network
//! conditions itself.
//!
//! [`EndpointCache`] and [`Governor`] are re-exported from `slsk-net` and
//! `slsk-transfer` respectively, where the connection manager and transfer
//! engine that consume them live; [`SlotAwaiter`] and the five resolvers
//! below are defined here since only the facade calls them.

use crate::error::ClientError;
use async_trait::async_trait;
use dashmap::DashMap;
use slsk_search::FileEntry;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub use slsk_net::EndpointCache;
pub use slsk_transfer::Governor;

/// External hook around upload slot admission, the third of the three
/// admission layers (per-user cap, external slot, global cap) an upload
/// passes through before it is allowed to start. The per-user and global
/// caps are enforced internally by [`crate::SoulseekClient`]; this trait
/// models whatever additional policy a deployment wants layered on top
/// (disk quotas, a priority queue, a friends list).
#[async_trait]
pub trait SlotAwaiter: Send + Sync {
    /// Block until a slot is available for `(username, filename)`, or
    /// fail permanently if this deployment will never grant one.
    async fn await_slot(&self, username: &str, filename: &str) -> Result<(), ClientError>;

    /// Release a slot previously granted by [`SlotAwaiter::await_slot`].
    async fn slot_released(&self, username: &str, filename: &str);
}

/// A [`SlotAwaiter`] that grants every request immediately; the default
/// when a deployment has no additional admission policy beyond the
/// per-user and global caps the facade already enforces.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateSlotAwaiter;

#[async_trait]
impl SlotAwaiter for ImmediateSlotAwaiter {
    async fn await_slot(&self, _username: &str, _filename: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn slot_released(&self, _username: &str, _filename: &str) {}
}

/// A [`SlotAwaiter`] that blocks until a per-user semaphore admits the
/// transfer, following the same per-key "ensure present before acquire,
/// clean up on empty" map discipline as the peer-connection dial lock.
/// This is the facade's own external admission layer, layered on top of the
/// per-user and global caps [`crate::SoulseekClient`] enforces internally.
pub struct PerUserSlotAwaiter {
    per_user_limit: usize,
    slots: DashMap<String, Arc<Semaphore>>,
    held: DashMap<(String, String), StdMutex<Vec<OwnedSemaphorePermit>>>,
}

impl PerUserSlotAwaiter {
    /// Allow up to `per_user_limit` concurrent admitted transfers to any one user.
    #[must_use]
    pub fn new(per_user_limit: usize) -> Self {
        Self {
            per_user_limit,
            slots: DashMap::new(),
            held: DashMap::new(),
        }
    }

    fn semaphore_for(&self, username: &str) -> Arc<Semaphore> {
        self.slots
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_user_limit)))
            .clone()
    }

    fn cleanup(&self, username: &str, semaphore: &Arc<Semaphore>) {
        if Arc::strong_count(semaphore) <= 2 {
            self.slots.remove_if(username, |_, v| Arc::ptr_eq(v, semaphore));
        }
    }
}

#[async_trait]
impl SlotAwaiter for PerUserSlotAwaiter {
    async fn await_slot(&self, username: &str, filename: &str) -> Result<(), ClientError> {
        let semaphore = self.semaphore_for(username);
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        self.held
            .entry((username.to_string(), filename.to_string()))
            .or_insert_with(|| StdMutex::new(Vec::new()))
            .lock()
            .unwrap()
            .push(permit);
        Ok(())
    }

    async fn slot_released(&self, username: &str, filename: &str) {
        let key = (username.to_string(), filename.to_string());
        let permit = self.held.get(&key).and_then(|held| held.lock().unwrap().pop());
        drop(permit);

        if let Some(semaphore) = self.slots.get(username).map(|e| e.value().clone()) {
            self.cleanup(username, &semaphore);
        }
        self.held.remove_if(&key, |_, v| v.lock().unwrap().is_empty());
    }
}

/// A folder in this client's shared tree, as reported to a `BrowseRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFolder {
    /// Folder path as presented to remote peers.
    pub name: String,
    /// Files directly inside this folder.
    pub files: Vec<FileEntry>,
}

/// Answers `BrowseRequest`s from peers with this client's full shared tree.
#[async_trait]
pub trait SharedFileProvider: Send + Sync {
    /// Every shared folder, for a full browse response.
    async fn browse(&self) -> Vec<SharedFolder>;
}

/// Answers `FolderContentsRequest`s from peers for one specific folder.
#[async_trait]
pub trait FolderContentsProvider: Send + Sync {
    /// The contents of `folder`, or `None` if it is not shared.
    async fn folder_contents(&self, folder: &str) -> Option<SharedFolder>;
}

/// This client's own advertised info, answering `InfoRequest`s from peers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientInfo {
    /// Free-text description shown to peers.
    pub description: String,
    /// Optional picture bytes (e.g. a JPEG), shown in some clients.
    pub picture: Option<Vec<u8>>,
    /// Advertised upload speed, bytes/sec.
    pub upload_speed: u32,
    /// Current upload queue length.
    pub queue_length: u32,
}

/// Answers `InfoRequest`s from peers.
#[async_trait]
pub trait ClientInfoProvider: Send + Sync {
    /// This client's current info snapshot.
    async fn client_info(&self) -> ClientInfo;
}

/// Decides whether this client has files matching a distributed search
/// request forwarded down from its parent.
#[async_trait]
pub trait SearchResponder: Send + Sync {
    /// Files matching `query` that this client would offer in a response.
    /// An empty vector means no response is sent.
    async fn matches(&self, query: &str) -> Vec<FileEntry>;
}

/// Answers `PlaceInQueueRequest`s and acts on a peer's own enqueue
/// decision once an upload has been requested.
#[async_trait]
pub trait QueueResolver: Send + Sync {
    /// This requester's current position in the local upload queue for
    /// `filename`, if this client tracks positions.
    async fn place_in_queue(&self, requester: &str, filename: &str) -> Option<u32>;

    /// Confirm that `filename` should be queued for `requester` once a
    /// transfer request is accepted but not yet admitted.
    async fn enqueue_download(&self, requester: &str, filename: &str) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_user_slot_awaiter_admits_up_to_the_limit() {
        let awaiter = PerUserSlotAwaiter::new(1);
        awaiter.await_slot("alice", "a.flac").await.unwrap();
        let blocked = tokio::time::timeout(std::time::Duration::from_millis(20), awaiter.await_slot("alice", "b.flac")).await;
        assert!(blocked.is_err(), "second slot for the same user should block");
        awaiter.slot_released("alice", "a.flac").await;
        awaiter.await_slot("alice", "b.flac").await.unwrap();
    }

    #[tokio::test]
    async fn per_user_slot_awaiter_users_are_independent() {
        let awaiter = PerUserSlotAwaiter::new(1);
        awaiter.await_slot("alice", "a.flac").await.unwrap();
        awaiter.await_slot("bob", "b.flac").await.unwrap();
    }
}
