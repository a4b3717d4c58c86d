//! Errors raised by search dispatch and collection.

use thiserror::Error;

/// Failures specific to issuing or collecting a search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// `token` is not a search this coordinator is tracking.
    #[error("unknown search token {0}")]
    UnknownSearch(u32),

    /// A search was already started under this token.
    #[error("search token {0} is already in use")]
    DuplicateToken(u32),

    /// The underlying frame encoding failed.
    #[error(transparent)]
    Frame(#[from] slsk_core::FrameError),

    /// The caller supplied an argument that can never be valid (e.g. a
    /// query with no terms left after filtering).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
