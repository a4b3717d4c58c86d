//! Client connection state.
//!
//! Modeled as a small `u8` bitset behind a newtype, matching the flags-style
//! state tracking used elsewhere in this codebase for connection and frame
//! state. [`StateMachine`] wraps a single cell of [`ClientState`] behind a
//! `tokio::sync::Mutex` so transitions are a single-entry critical section:
//! two tasks racing to transition never observe a torn intermediate state.

use std::fmt;
use tokio::sync::Mutex;

/// A snapshot of the client's connection lifecycle, encoded as a bitset.
///
/// Valid combinations enforce the invariant that [`ClientState::LOGGED_IN`]
/// implies [`ClientState::CONNECTED`], and [`ClientState::CONNECTING`] /
/// [`ClientState::CONNECTED`] are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientState(u8);

impl ClientState {
    /// No connection attempt is in progress or established.
    pub const DISCONNECTED: ClientState = ClientState(0b0000_0000);
    /// A TCP connection to the server is being established.
    pub const CONNECTING: ClientState = ClientState(0b0000_0001);
    /// The TCP connection to the server is established but not logged in.
    pub const CONNECTED: ClientState = ClientState(0b0000_0010);
    /// The login handshake is in flight.
    pub const LOGGING_IN: ClientState = ClientState(0b0000_0110);
    /// Login succeeded; the session is usable.
    pub const LOGGED_IN: ClientState = ClientState(0b0000_1110);
    /// A graceful shutdown has been initiated.
    pub const DISCONNECTING: ClientState = ClientState(0b0001_0000);

    /// True once the server TCP connection is established (implied by
    /// [`Self::LOGGED_IN`] and [`Self::LOGGING_IN`] as well).
    #[must_use]
    pub fn is_connected(self) -> bool {
        self.0 & Self::CONNECTED.0 != 0
    }

    /// True once login has completed successfully.
    #[must_use]
    pub fn is_logged_in(self) -> bool {
        self.0 & Self::LOGGED_IN.0 == Self::LOGGED_IN.0
    }

    /// True while a connect attempt is outstanding.
    #[must_use]
    pub fn is_connecting(self) -> bool {
        self.0 & Self::CONNECTING.0 != 0
    }

    /// True while a disconnect is in progress.
    #[must_use]
    pub fn is_disconnecting(self) -> bool {
        self.0 & Self::DISCONNECTING.0 != 0
    }

    /// Whether `self` is a structurally valid state (used in tests and
    /// debug assertions, not on the hot path).
    #[must_use]
    pub fn is_valid(self) -> bool {
        if self.is_logged_in() && !self.is_connected() {
            return false;
        }
        if self.is_connecting() && self.is_connected() && self != Self::LOGGING_IN && self != Self::LOGGED_IN {
            return false;
        }
        true
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::DISCONNECTED => "disconnected",
            Self::CONNECTING => "connecting",
            Self::CONNECTED => "connected",
            Self::LOGGING_IN => "logging_in",
            Self::LOGGED_IN => "logged_in",
            Self::DISCONNECTING => "disconnecting",
            _ => "unknown",
        };
        f.write_str(name)
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::DISCONNECTED
    }
}

/// Guards a single [`ClientState`] cell behind a mutex so transitions occur
/// one at a time; a transition closure observes the current state and
/// returns the next one, still holding the lock.
pub struct StateMachine {
    state: Mutex<ClientState>,
}

impl StateMachine {
    /// Start in [`ClientState::DISCONNECTED`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClientState::DISCONNECTED),
        }
    }

    /// Read the current state.
    pub async fn current(&self) -> ClientState {
        *self.state.lock().await
    }

    /// Atomically replace the state, returning the previous value.
    pub async fn transition(&self, next: ClientState) -> ClientState {
        let mut guard = self.state.lock().await;
        let previous = *guard;
        *guard = next;
        previous
    }

    /// Atomically replace the state only if `predicate(current)` holds,
    /// returning `Ok(previous)` on success or `Err(current)` if the
    /// predicate rejected the transition.
    pub async fn transition_if(
        &self,
        predicate: impl FnOnce(ClientState) -> bool,
        next: ClientState,
    ) -> Result<ClientState, ClientState> {
        let mut guard = self.state.lock().await;
        if !predicate(*guard) {
            return Err(*guard);
        }
        let previous = *guard;
        *guard = next;
        Ok(previous)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_in_implies_connected() {
        assert!(ClientState::LOGGED_IN.is_connected());
        assert!(ClientState::LOGGED_IN.is_logged_in());
        assert!(ClientState::LOGGED_IN.is_valid());
    }

    #[test]
    fn disconnected_is_neither() {
        assert!(!ClientState::DISCONNECTED.is_connected());
        assert!(!ClientState::DISCONNECTED.is_logged_in());
    }

    #[tokio::test]
    async fn transitions_are_serialized() {
        let machine = StateMachine::new();
        assert_eq!(machine.current().await, ClientState::DISCONNECTED);
        let prev = machine.transition(ClientState::CONNECTING).await;
        assert_eq!(prev, ClientState::DISCONNECTED);
        assert_eq!(machine.current().await, ClientState::CONNECTING);
    }

    #[tokio::test]
    async fn transition_if_rejects_when_predicate_fails() {
        let machine = StateMachine::new();
        machine.transition(ClientState::CONNECTED).await;
        let result = machine
            .transition_if(|s| s.is_logged_in(), ClientState::DISCONNECTING)
            .await;
        assert_eq!(result, Err(ClientState::CONNECTED));
        assert_eq!(machine.current().await, ClientState::CONNECTED);
    }

    #[tokio::test]
    async fn transition_if_accepts_when_predicate_holds() {
        let machine = StateMachine::new();
        machine.transition(ClientState::LOGGED_IN).await;
        let result = machine
            .transition_if(|s| s.is_logged_in(), ClientState::DISCONNECTING)
            .await;
        assert_eq!(result, Ok(ClientState::LOGGED_IN));
        assert_eq!(machine.current().await, ClientState::DISCONNECTING);
    }
}
