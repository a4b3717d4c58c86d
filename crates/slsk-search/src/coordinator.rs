//! Tracks in-flight searches and collects responses until a termination
//! policy is satisfied.

use crate::error::SearchError;
use crate::result::SearchResult;
use crate::scope::SearchScope;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// When to stop collecting responses for a search.
#[derive(Debug, Clone, Copy)]
pub struct TerminationPolicy {
    /// Stop once this many results have arrived, if set.
    pub max_results: Option<usize>,
    /// Stop once this much time has elapsed since the search started.
    pub timeout: Duration,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            max_results: None,
            timeout: Duration::from_secs(15),
        }
    }
}

/// One in-flight search.
pub struct SearchSession {
    token: u32,
    query: String,
    scope: SearchScope,
    policy: TerminationPolicy,
    results: std::sync::Mutex<Vec<SearchResult>>,
    done: AtomicBool,
    notify: Notify,
}

impl SearchSession {
    /// The correlation token this search was dispatched under.
    #[must_use]
    pub fn token(&self) -> u32 {
        self.token
    }

    /// The raw query text.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// What this search is scoped to.
    #[must_use]
    pub fn scope(&self) -> &SearchScope {
        &self.scope
    }

    /// Whether the termination policy has been satisfied.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Results collected so far, without waiting for completion.
    #[must_use]
    pub fn results_snapshot(&self) -> Vec<SearchResult> {
        self.results.lock().unwrap().clone()
    }

    /// Block until the termination policy is satisfied, then return every
    /// result collected.
    pub async fn wait_for_completion(&self) -> Vec<SearchResult> {
        while !self.is_done() {
            self.notify.notified().await;
        }
        self.results_snapshot()
    }

    fn record(&self, result: SearchResult) {
        let mut guard = self.results.lock().unwrap();
        guard.push(result);
        if let Some(max) = self.policy.max_results {
            if guard.len() >= max {
                drop(guard);
                self.mark_done();
            }
        }
    }

    fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Tracks every active search by its correlation token.
#[derive(Clone, Default)]
pub struct SearchCoordinator {
    active: Arc<DashMap<u32, Arc<SearchSession>>>,
}

impl SearchCoordinator {
    /// An empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Arc::new(DashMap::new()),
        }
    }

    /// Begin tracking a new search under `token`, starting its timeout
    /// timer immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::DuplicateToken`] if `token` is already active.
    pub fn start(
        &self,
        token: u32,
        query: impl Into<String>,
        scope: SearchScope,
        policy: TerminationPolicy,
    ) -> Result<Arc<SearchSession>, SearchError> {
        if self.active.contains_key(&token) {
            return Err(SearchError::DuplicateToken(token));
        }

        let session = Arc::new(SearchSession {
            token,
            query: query.into(),
            scope,
            policy,
            results: std::sync::Mutex::new(Vec::new()),
            done: AtomicBool::new(false),
            notify: Notify::new(),
        });
        self.active.insert(token, session.clone());

        let timeout_session = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout_session.policy.timeout).await;
            if !timeout_session.is_done() {
                timeout_session.mark_done();
            }
        });

        Ok(session)
    }

    /// Record a peer's response against an active search.
    ///
    /// Silently drops the result if `token` is not (or is no longer)
    /// active — a slow response arriving after the search already
    /// terminated is not an error.
    pub fn record_result(&self, token: u32, result: SearchResult) {
        if let Some(session) = self.active.get(&token) {
            if !session.is_done() {
                session.record(result);
            }
        }
    }

    /// Look up an active or recently finished search.
    #[must_use]
    pub fn get(&self, token: u32) -> Option<Arc<SearchSession>> {
        self.active.get(&token).map(|e| e.value().clone())
    }

    /// Stop tracking a search, returning its final results.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::UnknownSearch`] if `token` is not tracked.
    pub fn finish(&self, token: u32) -> Result<Vec<SearchResult>, SearchError> {
        let (_, session) = self
            .active
            .remove(&token)
            .ok_or(SearchError::UnknownSearch(token))?;
        session.mark_done();
        Ok(session.results_snapshot())
    }

    /// Number of currently tracked searches.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Mark every active search done and stop tracking it, e.g. because the
    /// server connection it depends on has gone away. Any task blocked in
    /// [`SearchSession::wait_for_completion`] wakes with whatever results
    /// had already arrived.
    pub fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().mark_done();
        }
        self.active.clear();
    }
}
