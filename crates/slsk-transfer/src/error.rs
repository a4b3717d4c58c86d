//! Errors raised while negotiating or running a file transfer.

use thiserror::Error;

/// Failures specific to the transfer engine.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A frame-level or socket failure talking to the remote peer.
    #[error(transparent)]
    Net(#[from] slsk_net::NetError),

    /// Raw socket I/O failure on the transfer connection itself.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote peer rejected the transfer (queue full, file missing,
    /// banned, etc).
    #[error("transfer of {filename} rejected: {reason}")]
    Rejected {
        /// The file that was rejected.
        filename: String,
        /// The reason string the remote supplied.
        reason: String,
    },

    /// An operation was attempted against a transfer not in a state that
    /// permits it (e.g. resuming a completed transfer).
    #[error("transfer {0} is not in a state that permits this operation")]
    InvalidState(u32),

    /// No admission slot was available for this upload.
    #[error("no upload slot available for {0}")]
    NoSlotAvailable(String),

    /// The transfer was cancelled by the caller.
    #[error("transfer cancelled")]
    Cancelled,

    /// `transfer_id` is not tracked by the registry.
    #[error("unknown transfer id {0}")]
    UnknownTransfer(u32),

    /// A session is already registered under this token.
    #[error("transfer token {0} is already in use")]
    DuplicateToken(u32),

    /// A session is already active for this `(username, filename)` pair.
    #[error("a transfer for this file is already active (conflicts with token {0})")]
    DuplicateTransfer(u32),
}

impl TransferError {
    /// Whether retrying the same transfer stands a reasonable chance of
    /// succeeding without caller intervention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Net(e) => e.is_transient(),
            TransferError::Io(_) | TransferError::NoSlotAvailable(_) => true,
            _ => false,
        }
    }

    /// Whether this failure requires the caller to change something (a
    /// different file, a different peer) before retrying.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TransferError::Rejected { .. }
                | TransferError::InvalidState(_)
                | TransferError::UnknownTransfer(_)
                | TransferError::DuplicateToken(_)
                | TransferError::DuplicateTransfer(_)
        )
    }
}
