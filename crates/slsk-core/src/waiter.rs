//! The wait/complete correlation primitive.
//!
//! Bridges inbound messages to outstanding in-flight operations. Each
//! [`WaitKey`] admits an ordered queue of pending single-shot completions;
//! `complete`/`throw` always resolve the head of that queue, so completions
//! are FIFO with respect to registration.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A composite correlation key: a message code plus up to three ancillary
/// discriminators. Two keys are equal iff all components are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WaitKey {
    /// The message code this wait correlates to.
    pub code: u32,
    /// First string discriminator (e.g. remote username).
    pub s1: Option<String>,
    /// Second string discriminator (e.g. filename).
    pub s2: Option<String>,
    /// Integer discriminator (e.g. a token).
    pub i1: Option<i64>,
}

impl WaitKey {
    /// Build a key from just a message code.
    #[must_use]
    pub fn code(code: u32) -> Self {
        Self {
            code,
            s1: None,
            s2: None,
            i1: None,
        }
    }

    /// Attach a string discriminator.
    #[must_use]
    pub fn with_str(mut self, s: impl Into<String>) -> Self {
        if self.s1.is_none() {
            self.s1 = Some(s.into());
        } else {
            self.s2 = Some(s.into());
        }
        self
    }

    /// Attach an integer discriminator.
    #[must_use]
    pub fn with_int(mut self, i: i64) -> Self {
        self.i1 = Some(i);
        self
    }
}

impl fmt::Display for WaitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WaitKey(code={}, s1={:?}, s2={:?}, i1={:?})",
            self.code, self.s1, self.s2, self.i1
        )
    }
}

/// An outcome delivered to a waiting operation.
pub type WaitResult<T> = Result<T, WaitError>;

/// Why a wait failed to produce a successful value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WaitError {
    /// The wait exceeded its deadline with no completion.
    #[error("wait timed out")]
    Timeout,
    /// The wait was explicitly cancelled.
    #[error("wait cancelled")]
    Cancelled,
    /// `throw` was called with this message.
    #[error("{0}")]
    Thrown(String),
}

type PendingMap = DashMap<WaitKey, VecDeque<oneshot::Sender<WaitResult<Box<dyn std::any::Any + Send>>>>>;

/// Correlates inbound messages with outstanding operations via [`WaitKey`].
///
/// Thread-safe for concurrent `wait`/`complete` from any number of tasks.
pub struct Waiter {
    pending: Arc<PendingMap>,
    default_timeout: Duration,
}

impl Waiter {
    /// Create a waiter using `default_timeout` when a `wait` call omits one.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            default_timeout,
        }
    }

    /// Register a completion for `key` and await it, failing after
    /// `timeout` (or the waiter's default) with no completion.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] if the deadline elapses,
    /// [`WaitError::Cancelled`] if cancelled first, or
    /// [`WaitError::Thrown`] if the caller completing the key used `throw`.
    pub async fn wait<T: Send + 'static>(
        &self,
        key: WaitKey,
        timeout: Option<Duration>,
    ) -> WaitResult<T> {
        let rx = self.register(key);
        let deadline = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result.map(|boxed| *boxed.downcast::<T>().expect("wait type mismatch")),
            Ok(Err(_canceled)) => Err(WaitError::Cancelled),
            Err(_elapsed) => Err(WaitError::Timeout),
        }
    }

    /// Register a completion for `key` with no deadline; only resolved by
    /// an explicit `complete`, `throw`, or `cancellation` firing.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Cancelled`] if `cancellation` fires first, or
    /// whatever `complete`/`throw` was called with.
    pub async fn wait_indefinitely<T: Send + 'static>(
        &self,
        key: WaitKey,
        cancellation: CancellationToken,
    ) -> WaitResult<T> {
        let rx = self.register(key.clone());
        tokio::select! {
            result = rx => {
                match result {
                    Ok(r) => r.map(|boxed| *boxed.downcast::<T>().expect("wait type mismatch")),
                    Err(_canceled) => Err(WaitError::Cancelled),
                }
            }
            _ = cancellation.cancelled() => {
                self.cancel(&key);
                Err(WaitError::Cancelled)
            }
        }
    }

    fn register(
        &self,
        key: WaitKey,
    ) -> oneshot::Receiver<WaitResult<Box<dyn std::any::Any + Send>>> {
        let (tx, rx) = oneshot::channel();
        self.pending.entry(key).or_default().push_back(tx);
        rx
    }

    /// Resolve the oldest pending wait for `key` with a success value.
    /// No-ops silently if no wait is pending.
    pub fn complete<T: Send + 'static>(&self, key: &WaitKey, value: T) {
        self.resolve(key, Ok(Box::new(value)));
    }

    /// Resolve the oldest pending wait for `key` with an error.
    /// No-ops silently if no wait is pending.
    pub fn throw(&self, key: &WaitKey, message: impl Into<String>) {
        self.resolve(key, Err(WaitError::Thrown(message.into())));
    }

    fn resolve(&self, key: &WaitKey, result: WaitResult<Box<dyn std::any::Any + Send>>) {
        if let Some(mut queue) = self.pending.get_mut(key) {
            if let Some(tx) = queue.pop_front() {
                let _ = tx.send(result);
                return;
            }
        }
        tracing::trace!(%key, "waiter.resolve: no pending wait for key");
    }

    /// Reject every pending wait for `key` with [`WaitError::Cancelled`]
    /// and remove the key's queue.
    pub fn cancel(&self, key: &WaitKey) {
        if let Some((_, queue)) = self.pending.remove(key) {
            for tx in queue {
                let _ = tx.send(Err(WaitError::Cancelled));
            }
        }
    }

    /// Reject every pending wait across all keys with
    /// [`WaitError::Cancelled`].
    pub fn cancel_all(&self) {
        let keys: Vec<WaitKey> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.cancel(&key);
        }
    }

    /// Number of distinct keys with at least one pending wait (test/debug use).
    pub fn pending_key_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_resolves_wait() {
        let waiter = Waiter::new(Duration::from_secs(1));
        let key = WaitKey::code(1);

        let fut = waiter.wait::<u32>(key.clone(), None);
        let complete_fut = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waiter.complete(&key, 7u32);
        };
        let (result, _) = tokio::join!(fut, complete_fut);
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn duplicate_completions_are_fifo() {
        let waiter = Waiter::new(Duration::from_secs(1));
        let key = WaitKey::code(2);

        let w1 = waiter.wait::<u32>(key.clone(), None);
        let w2 = waiter.wait::<u32>(key.clone(), None);

        tokio::time::sleep(Duration::from_millis(5)).await;
        waiter.complete(&key, 1u32);
        waiter.complete(&key, 2u32);

        let (r1, r2) = tokio::join!(w1, w2);
        assert_eq!(r1.unwrap(), 1);
        assert_eq!(r2.unwrap(), 2);
    }

    #[tokio::test]
    async fn times_out_with_no_completion() {
        let waiter = Waiter::new(Duration::from_millis(20));
        let key = WaitKey::code(3);
        let result = waiter.wait::<u32>(key, None).await;
        assert!(matches!(result, Err(WaitError::Timeout)));
    }

    #[tokio::test]
    async fn throw_resolves_as_error() {
        let waiter = Waiter::new(Duration::from_secs(1));
        let key = WaitKey::code(4);
        let fut = waiter.wait::<u32>(key.clone(), None);
        let throw_fut = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            waiter.throw(&key, "denied");
        };
        let (result, _) = tokio::join!(fut, throw_fut);
        assert!(matches!(result, Err(WaitError::Thrown(msg)) if msg == "denied"));
    }

    #[tokio::test]
    async fn cancel_removes_pending_wait() {
        let waiter = Waiter::new(Duration::from_secs(5));
        let key = WaitKey::code(5);
        let fut = waiter.wait::<u32>(key.clone(), None);
        let cancel_fut = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            waiter.cancel(&key);
        };
        let (result, _) = tokio::join!(fut, cancel_fut);
        assert!(matches!(result, Err(WaitError::Cancelled)));
        assert_eq!(waiter.pending_key_count(), 0);
    }

    #[tokio::test]
    async fn complete_with_no_waiter_is_a_no_op() {
        let waiter = Waiter::new(Duration::from_secs(1));
        let key = WaitKey::code(6);
        waiter.complete(&key, 9u32);
        assert_eq!(waiter.pending_key_count(), 0);
    }

    #[tokio::test]
    async fn wait_indefinitely_only_resolves_explicitly() {
        let waiter = Arc::new(Waiter::new(Duration::from_millis(10)));
        let key = WaitKey::code(7);
        let token = CancellationToken::new();

        let w = waiter.clone();
        let k = key.clone();
        let t = token.clone();
        let handle = tokio::spawn(async move { w.wait_indefinitely::<u32>(k, t).await });

        // Outlives the short default timeout with no completion.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        waiter.complete(&key, 42u32);
        assert_eq!(handle.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn wait_indefinitely_cancelled_by_token() {
        let waiter = Arc::new(Waiter::new(Duration::from_secs(5)));
        let key = WaitKey::code(8);
        let token = CancellationToken::new();

        let w = waiter.clone();
        let k = key.clone();
        let t = token.clone();
        let handle = tokio::spawn(async move { w.wait_indefinitely::<u32>(k, t).await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel();

        assert!(matches!(handle.await.unwrap(), Err(WaitError::Cancelled)));
    }

    #[test]
    fn wait_key_equality_is_component_wise() {
        let a = WaitKey::code(1).with_str("bob").with_int(5);
        let b = WaitKey::code(1).with_str("bob").with_int(5);
        let c = WaitKey::code(1).with_str("alice").with_int(5);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
