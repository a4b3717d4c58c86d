//! The event stream a caller observes.

use slsk_core::state::ClientState;
use slsk_distributed::DistributedEvent;
use slsk_search::SearchResult;

/// Top-level events the client facade emits on its broadcast channel.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The connection lifecycle state changed.
    StateChanged {
        /// The state before this transition.
        previous: ClientState,
        /// The state after this transition.
        current: ClientState,
        /// Why the transition happened, for logging/diagnostics.
        reason: &'static str,
    },
    /// The server connection came up and login succeeded.
    Connected {
        /// The server's greeting-of-the-day text.
        greeting: String,
    },
    /// The server connection dropped, or login failed.
    Disconnected {
        /// Human-readable reason, if one was available.
        reason: Option<String>,
    },
    /// The server kicked this client (another login elsewhere).
    Kicked,
    /// A distributed-overlay tree-shape change.
    Distributed(DistributedEvent),
    /// A new result arrived for an in-flight search.
    SearchResult {
        /// The search's correlation token.
        token: u32,
        /// The result itself.
        result: SearchResult,
    },
    /// A search's termination policy was satisfied.
    SearchCompleted {
        /// The search's correlation token.
        token: u32,
    },
    /// A download's state changed.
    DownloadProgress {
        /// The download's correlation token.
        token: u32,
        /// Bytes transferred so far.
        transferred: u64,
        /// Declared total size.
        total: u64,
    },
    /// A download reached a terminal state.
    DownloadFinished {
        /// The download's correlation token.
        token: u32,
        /// `Ok(())` on success, `Err(reason)` otherwise.
        result: Result<(), String>,
    },
    /// An upload's state changed.
    UploadProgress {
        /// The upload's correlation token.
        token: u32,
        /// Bytes transferred so far.
        transferred: u64,
        /// Declared total size.
        total: u64,
    },
    /// An upload reached a terminal state.
    UploadFinished {
        /// The upload's correlation token.
        token: u32,
        /// `Ok(())` on success, `Err(reason)` otherwise.
        result: Result<(), String>,
    },
}
