//! Per-chunk transfer throttling.
//!
//! This is distinct from slot *admission* (deciding whether a transfer is
//! allowed to start at all, handled by `SlotAwaiter` in `slsk-client`): a
//! [`Governor`] is consulted at every chunk boundary of a transfer already
//! underway, so it can pace bandwidth, insert delays, or cancel mid-flight.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// One chunk boundary of a running transfer, passed to [`Governor::throttle`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkContext {
    /// The transfer's correlation token.
    pub token: u32,
    /// Bytes moved in the chunk that just completed.
    pub bytes_this_chunk: usize,
    /// Total bytes moved so far, including this chunk.
    pub bytes_transferred: u64,
    /// The transfer's total size, if known in advance.
    pub total_size: u64,
}

/// Paces a transfer at chunk boundaries.
///
/// A deployment provides its own implementation to express whatever
/// bandwidth policy it wants (a token-bucket limiter, a fixed delay, nothing
/// at all); the transfer loop only needs to await the returned future
/// between chunks and watch `cancel` for a reason to stop early.
#[async_trait]
pub trait Governor: Send + Sync {
    /// Pace or inspect the transfer after one chunk has moved. Returns once
    /// the caller may proceed to the next chunk, or early if `cancel` fires.
    async fn throttle(&self, chunk: ChunkContext, cancel: &CancellationToken);
}

/// A [`Governor`] that never throttles; the default when a deployment has
/// no bandwidth policy of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGovernor;

#[async_trait]
impl Governor for NoopGovernor {
    async fn throttle(&self, _chunk: ChunkContext, _cancel: &CancellationToken) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_governor_returns_immediately() {
        let governor = NoopGovernor;
        let cancel = CancellationToken::new();
        governor
            .throttle(
                ChunkContext {
                    token: 1,
                    bytes_this_chunk: 4096,
                    bytes_transferred: 4096,
                    total_size: 8192,
                },
                &cancel,
            )
            .await;
    }
}
