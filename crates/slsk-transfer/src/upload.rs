//! The upload state machine.

use crate::error::TransferError;
use tokio::sync::Mutex;

/// An upload's lifecycle stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    /// Waiting for an admission slot, governed by [`crate::Governor`].
    Queued {
        /// Position in this peer's upload queue, if known.
        position: Option<u32>,
    },
    /// A slot was granted and the remote was notified; waiting for it to
    /// open the raw socket.
    Requested,
    /// Bytes are flowing.
    InProgress {
        /// Bytes sent so far.
        transferred: u64,
    },
    /// The full file was sent.
    Completed,
    /// The caller or remote cancelled the upload.
    Cancelled,
    /// The transfer failed and will not be retried automatically.
    Failed(String),
}

impl UploadState {
    /// Whether this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Cancelled | UploadState::Failed(_)
        )
    }
}

/// One upload in flight, identified by the token used to correlate its
/// `TransferRequest`/`TransferResponse` exchange.
pub struct UploadSession {
    token: u32,
    username: String,
    filename: String,
    size: u64,
    state: Mutex<UploadState>,
}

impl UploadSession {
    /// Begin tracking a new upload, queued until a slot is granted.
    #[must_use]
    pub fn new(token: u32, username: impl Into<String>, filename: impl Into<String>, size: u64) -> Self {
        Self {
            token,
            username: username.into(),
            filename: filename.into(),
            size,
            state: Mutex::new(UploadState::Queued { position: None }),
        }
    }

    /// The correlation token for this upload.
    #[must_use]
    pub fn token(&self) -> u32 {
        self.token
    }

    /// The remote username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The local filename being served.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Declared total size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Snapshot the current state.
    pub async fn state(&self) -> UploadState {
        self.state.lock().await.clone()
    }

    /// Update the queue position while still waiting for a slot.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if not currently `Queued`.
    pub async fn update_position(&self, position: u32) -> Result<(), TransferError> {
        let mut guard = self.state.lock().await;
        match *guard {
            UploadState::Queued { .. } => {
                *guard = UploadState::Queued {
                    position: Some(position),
                };
                Ok(())
            }
            _ => Err(TransferError::InvalidState(self.token)),
        }
    }

    /// A slot was granted; the remote was sent a `TransferResponse`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if not currently `Queued`.
    pub async fn mark_requested(&self) -> Result<(), TransferError> {
        let mut guard = self.state.lock().await;
        match *guard {
            UploadState::Queued { .. } => {
                *guard = UploadState::Requested;
                Ok(())
            }
            _ => Err(TransferError::InvalidState(self.token)),
        }
    }

    /// The raw socket came up and the first bytes were sent.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if not currently `Requested`.
    pub async fn mark_in_progress(&self, already_transferred: u64) -> Result<(), TransferError> {
        let mut guard = self.state.lock().await;
        match *guard {
            UploadState::Requested => {
                *guard = UploadState::InProgress {
                    transferred: already_transferred,
                };
                Ok(())
            }
            _ => Err(TransferError::InvalidState(self.token)),
        }
    }

    /// Record `n` additional bytes sent.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if not currently `InProgress`.
    pub async fn advance(&self, n: u64) -> Result<u64, TransferError> {
        let mut guard = self.state.lock().await;
        match &mut *guard {
            UploadState::InProgress { transferred } => {
                *transferred += n;
                Ok(*transferred)
            }
            _ => Err(TransferError::InvalidState(self.token)),
        }
    }

    /// Mark the upload complete.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if already terminal.
    pub async fn complete(&self) -> Result<(), TransferError> {
        let mut guard = self.state.lock().await;
        if guard.is_terminal() {
            return Err(TransferError::InvalidState(self.token));
        }
        *guard = UploadState::Completed;
        Ok(())
    }

    /// Cancel the upload from any non-terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if already terminal.
    pub async fn cancel(&self) -> Result<(), TransferError> {
        let mut guard = self.state.lock().await;
        if guard.is_terminal() {
            return Err(TransferError::InvalidState(self.token));
        }
        *guard = UploadState::Cancelled;
        Ok(())
    }

    /// Fail the upload from any non-terminal state.
    pub async fn fail(&self, reason: impl Into<String>) {
        let mut guard = self.state.lock().await;
        if !guard.is_terminal() {
            *guard = UploadState::Failed(reason.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn happy_path_transitions() {
        let session = UploadSession::new(1, "bob", "album.zip", 2000);
        session.update_position(3).await.unwrap();
        session.mark_requested().await.unwrap();
        session.mark_in_progress(0).await.unwrap();
        session.advance(2000).await.unwrap();
        session.complete().await.unwrap();
        assert_eq!(session.state().await, UploadState::Completed);
    }

    #[tokio::test]
    async fn position_update_rejected_once_requested() {
        let session = UploadSession::new(1, "bob", "album.zip", 2000);
        session.mark_requested().await.unwrap();
        assert!(session.update_position(1).await.is_err());
    }

    #[tokio::test]
    async fn terminal_state_rejects_further_progress() {
        let session = UploadSession::new(1, "bob", "album.zip", 2000);
        session.fail("disk read error").await;
        assert!(session.mark_requested().await.is_err());
    }
}
