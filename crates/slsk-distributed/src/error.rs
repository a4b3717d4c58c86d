//! Errors raised by the distributed overlay.

use thiserror::Error;

/// Failures specific to maintaining the parent/child tree.
#[derive(Debug, Error)]
pub enum DistributedError {
    /// A frame-level failure while talking to a parent or child.
    #[error(transparent)]
    Net(#[from] slsk_net::NetError),

    /// Attempted an operation that requires a parent, with none adopted.
    #[error("no parent is currently adopted")]
    NoParent,

    /// Attempted to adopt a parent while one is already adopted.
    #[error("a parent is already adopted: {0}")]
    AlreadyHasParent(String),

    /// `username` is not a tracked child.
    #[error("{0} is not a tracked child")]
    UnknownChild(String),

    /// Accepting this child would exceed the configured distributed child
    /// limit.
    #[error("distributed child limit reached")]
    ChildLimitReached,
}

impl DistributedError {
    /// Whether retrying stands a reasonable chance of succeeding.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, DistributedError::Net(e) if e.is_transient())
    }

    /// Whether this failure reflects caller misuse rather than network
    /// conditions.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            DistributedError::NoParent
                | DistributedError::AlreadyHasParent(_)
                | DistributedError::UnknownChild(_)
                | DistributedError::ChildLimitReached
        )
    }
}
