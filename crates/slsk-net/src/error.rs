//! Error classification for the networking layer.
//!
//! Mirrors the transient/permanent split used throughout this workspace so
//! callers can decide whether to retry without matching on variants by hand.

use thiserror::Error;

/// Failures that can occur while dialing, accepting, or framing a peer
/// connection.
#[derive(Debug, Error)]
pub enum NetError {
    /// The underlying TCP operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame-level decode/encode failure.
    #[error(transparent)]
    Frame(#[from] slsk_core::FrameError),

    /// The NAT-traversal handshake did not complete before its deadline.
    #[error("handshake with {username} timed out")]
    HandshakeTimeout {
        /// The peer we were attempting to reach.
        username: String,
    },

    /// The peer sent a handshake token that did not match any outstanding
    /// `ConnectToPeer` invitation.
    #[error("unrecognized handshake token {token} from {username}")]
    UnrecognizedToken {
        /// The peer presenting the token.
        username: String,
        /// The token it presented.
        token: u32,
    },

    /// No cached or resolvable endpoint exists for this user.
    #[error("no known endpoint for {0}")]
    NoEndpoint(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A handshake frame was malformed or carried an unexpected code.
    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),
}

impl NetError {
    /// Whether retrying the same operation without intervention stands a
    /// reasonable chance of succeeding.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NetError::Io(_) | NetError::HandshakeTimeout { .. } | NetError::NoEndpoint(_)
        )
    }

    /// Whether the operation is permanently unrecoverable as given (the
    /// caller must change something before retrying).
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            NetError::UnrecognizedToken { .. } | NetError::Frame(_) | NetError::InvalidHandshake(_)
        )
    }

    /// Convenience combinator most call sites want: retry transient
    /// failures, surface everything else.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.is_transient() && !matches!(self, NetError::Cancelled)
    }
}
