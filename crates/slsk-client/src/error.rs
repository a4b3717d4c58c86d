//! The client facade's aggregate error type.

use thiserror::Error;

/// Every way a client-level operation can fail, folding in each sub-crate's
/// own error type so callers match on one enum.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A networking failure (dial, handshake, framing).
    #[error(transparent)]
    Net(#[from] slsk_net::NetError),

    /// A distributed-overlay failure.
    #[error(transparent)]
    Distributed(#[from] slsk_distributed::DistributedError),

    /// A transfer-engine failure.
    #[error(transparent)]
    Transfer(#[from] slsk_transfer::TransferError),

    /// A search-coordinator failure.
    #[error(transparent)]
    Search(#[from] slsk_search::SearchError),

    /// A core framing failure.
    #[error(transparent)]
    Frame(#[from] slsk_core::FrameError),

    /// The server rejected a login attempt.
    #[error("login rejected: {0}")]
    LoginRejected(String),

    /// An operation was attempted before login completed.
    #[error("not logged in")]
    NotLoggedIn,

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The remote side explicitly rejected a correlated request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ClientError {
    /// Whether retrying stands a reasonable chance of succeeding without
    /// caller intervention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Net(e) => e.is_transient(),
            ClientError::Distributed(e) => e.is_transient(),
            ClientError::Transfer(e) => e.is_transient(),
            ClientError::Timeout => true,
            _ => false,
        }
    }

    /// Whether this failure requires the caller to change something before
    /// retrying.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            ClientError::Net(e) => e.is_permanent(),
            ClientError::Distributed(e) => e.is_permanent(),
            ClientError::Transfer(e) => e.is_permanent(),
            ClientError::LoginRejected(_) | ClientError::Frame(_) => true,
            _ => false,
        }
    }
}
