//! The download state machine.

use crate::error::TransferError;
use tokio::sync::Mutex;

/// A download's lifecycle stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    /// Queued on the remote peer; no slot granted yet.
    Queued,
    /// The remote accepted the transfer request; the raw socket is being
    /// established.
    Requested,
    /// Bytes are flowing.
    InProgress {
        /// Bytes received so far.
        transferred: u64,
    },
    /// The full file was received.
    Completed,
    /// The caller cancelled the download.
    Cancelled,
    /// The transfer failed and will not be retried automatically.
    Failed(String),
}

impl DownloadState {
    /// Whether this is a terminal state (no further transitions are valid).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Cancelled | DownloadState::Failed(_)
        )
    }
}

/// One download in flight, identified by the token used to correlate its
/// `TransferRequest`/`TransferResponse` exchange.
pub struct DownloadSession {
    token: u32,
    username: String,
    filename: String,
    size: u64,
    state: Mutex<DownloadState>,
    buffer: Mutex<Vec<u8>>,
}

impl DownloadSession {
    /// Begin tracking a new download, queued until the remote grants it.
    #[must_use]
    pub fn new(token: u32, username: impl Into<String>, filename: impl Into<String>, size: u64) -> Self {
        Self {
            token,
            username: username.into(),
            filename: filename.into(),
            size,
            state: Mutex::new(DownloadState::Queued),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// The correlation token for this download.
    #[must_use]
    pub fn token(&self) -> u32 {
        self.token
    }

    /// The remote username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The remote filename being transferred.
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
    pub async fn state(&self) -> DownloadState {
        self.state.lock().await.clone()
    }

    /// The remote accepted the transfer request.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if not currently `Queued`.
    pub async fn mark_requested(&self) -> Result<(), TransferError> {
        let mut guard = self.state.lock().await;
        match *guard {
            DownloadState::Queued => {
                *guard = DownloadState::Requested;
                Ok(())
            }
            _ => Err(TransferError::InvalidState(self.token)),
        }
    }

    /// The raw socket came up and the first bytes arrived.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if not currently `Requested`.
    pub async fn mark_in_progress(&self, already_transferred: u64) -> Result<(), TransferError> {
        let mut guard = self.state.lock().await;
        match *guard {
            DownloadState::Requested => {
                *guard = DownloadState::InProgress {
                    transferred: already_transferred,
                };
                Ok(())
            }
            _ => Err(TransferError::InvalidState(self.token)),
        }
    }

    /// Record `n` additional bytes received.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if not currently `InProgress`.
    pub async fn advance(&self, n: u64) -> Result<u64, TransferError> {
        let mut guard = self.state.lock().await;
        match &mut *guard {
            DownloadState::InProgress { transferred } => {
                *transferred += n;
                Ok(*transferred)
            }
            _ => Err(TransferError::InvalidState(self.token)),
        }
    }

    /// Append freshly received bytes to this download's buffer and advance
    /// its transferred counter.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if not currently `InProgress`.
    pub async fn append(&self, data: &[u8]) -> Result<u64, TransferError> {
        let transferred = self.advance(data.len() as u64).await?;
        self.buffer.lock().await.extend_from_slice(data);
        Ok(transferred)
    }

    /// Take the bytes received so far, leaving the buffer empty.
    pub async fn take_buffer(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock().await)
    }

    /// Mark the download complete.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if already terminal.
    pub async fn complete(&self) -> Result<(), TransferError> {
        let mut guard = self.state.lock().await;
        if guard.is_terminal() {
            return Err(TransferError::InvalidState(self.token));
        }
        *guard = DownloadState::Completed;
        Ok(())
    }

    /// Cancel the download from any non-terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidState`] if already terminal.
    pub async fn cancel(&self) -> Result<(), TransferError> {
        let mut guard = self.state.lock().await;
        if guard.is_terminal() {
            return Err(TransferError::InvalidState(self.token));
        }
        *guard = DownloadState::Cancelled;
        Ok(())
    }

    /// Fail the download from any non-terminal state.
    pub async fn fail(&self, reason: impl Into<String>) {
        let mut guard = self.state.lock().await;
        if !guard.is_terminal() {
            *guard = DownloadState::Failed(reason.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn happy_path_transitions() {
        let session = DownloadSession::new(1, "alice", "song.flac", 1000);
        assert_eq!(session.state().await, DownloadState::Queued);
        session.mark_requested().await.unwrap();
        session.mark_in_progress(0).await.unwrap();
        session.advance(500).await.unwrap();
        assert_eq!(session.state().await, DownloadState::InProgress { transferred: 500 });
        session.complete().await.unwrap();
        assert_eq!(session.state().await, DownloadState::Completed);
    }

    #[tokio::test]
    async fn cannot_advance_before_in_progress() {
        let session = DownloadSession::new(1, "alice", "song.flac", 1000);
        let err = session.advance(10).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidState(1)));
    }

    #[tokio::test]
    async fn cannot_transition_out_of_terminal_state() {
        let session = DownloadSession::new(1, "alice", "song.flac", 1000);
        session.cancel().await.unwrap();
        assert!(session.complete().await.is_err());
        assert!(session.cancel().await.is_err());
    }

    #[tokio::test]
    async fn append_accumulates_into_buffer() {
        let session = DownloadSession::new(1, "alice", "song.flac", 10);
        session.mark_requested().await.unwrap();
        session.mark_in_progress(0).await.unwrap();
        session.append(b"hello").await.unwrap();
        session.append(b"world").await.unwrap();
        assert_eq!(session.state().await, DownloadState::InProgress { transferred: 10 });
        assert_eq!(session.take_buffer().await, b"helloworld");
        assert!(session.take_buffer().await.is_empty());
    }

    #[tokio::test]
    async fn fail_is_idempotent_once_terminal() {
        let session = DownloadSession::new(1, "alice", "song.flac", 1000);
        session.cancel().await.unwrap();
        session.fail("should not override").await;
        assert_eq!(session.state().await, DownloadState::Cancelled);
    }
}
