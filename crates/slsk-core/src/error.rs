//! Shared error types for framing and correlation.

use thiserror::Error;

/// Errors raised while reading or writing a length-prefixed frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the connection mid-read or mid-write.
    #[error("connection closed")]
    Closed,

    /// The declared payload length exceeds the configured maximum.
    #[error("frame of {declared} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Length declared in the frame header.
        declared: u32,
        /// Configured maximum frame size.
        max: u32,
    },

    /// The stream ended before a complete frame could be read.
    #[error("stream truncated while reading frame")]
    Truncated,

    /// zlib inflate of a compressed payload failed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// The underlying I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error type for correlation-primitive failures.
#[derive(Debug, Error)]
pub enum Error {
    /// A frame-level failure.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A wait registered under a key that already has an active wait.
    #[error("duplicate wait registered for key {0:?}")]
    DuplicateWait(crate::waiter::WaitKey),

    /// A wait was explicitly cancelled.
    #[error("wait cancelled")]
    Cancelled,

    /// A wait exceeded its deadline with no completion.
    #[error("wait timed out")]
    Timeout,
}
