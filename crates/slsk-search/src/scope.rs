//! Search scope: which server message encodes a given query, and query-text
//! normalization shared by every scope.

use crate::error::SearchError;
use slsk_core::codes::server;

/// What a search query is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    /// Every client on the network.
    Network,
    /// Members of one room.
    Room(String),
    /// A specific set of users; one `UserSearchRequest` frame is sent per
    /// entry.
    User(Vec<String>),
    /// A saved query dispatched automatically on the server's wishlist
    /// interval, network-wide.
    Wishlist,
}

impl SearchScope {
    /// The server message code this scope dispatches under.
    #[must_use]
    pub fn message_code(&self) -> u32 {
        match self {
            SearchScope::Network => server::SEARCH_REQUEST,
            SearchScope::Room(_) => server::ROOM_SEARCH_REQUEST,
            SearchScope::User(_) => server::USER_SEARCH_REQUEST,
            SearchScope::Wishlist => server::WISHLIST_SEARCH_REQUEST,
        }
    }

    /// The room this scope targets, for scopes with exactly one target.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            SearchScope::Room(room) => Some(room),
            SearchScope::Network | SearchScope::Wishlist | SearchScope::User(_) => None,
        }
    }

    /// Every user this scope targets; empty for scopes that are not
    /// user-scoped. [`SoulseekClient::search`](crate) sends one
    /// `UserSearchRequest` frame per entry.
    #[must_use]
    pub fn targets(&self) -> Vec<&str> {
        match self {
            SearchScope::User(usernames) => usernames.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Normalize raw query text into the positive/negative term form the
/// network expects: terms prefixed with `-` are exclusions, terms of a
/// single character are dropped entirely (they are too common to be
/// useful), and the result must still contain at least one positive term.
///
/// # Errors
///
/// Returns [`SearchError::InvalidArgument`] if no positive term survives
/// filtering.
pub fn normalize_query(raw: &str) -> Result<String, SearchError> {
    let mut positive = Vec::new();
    let mut negative = Vec::new();

    for term in raw.split_whitespace() {
        let (bucket, text) = match term.strip_prefix('-') {
            Some(rest) => (&mut negative, rest),
            None => (&mut positive, term),
        };
        if text.chars().count() <= 1 {
            continue;
        }
        bucket.push(text.to_string());
    }

    if positive.is_empty() {
        return Err(SearchError::InvalidArgument(
            "search query has no terms after filtering exclusions and single-character words".into(),
        ));
    }

    let mut normalized = positive.join(" ");
    for term in negative {
        normalized.push_str(" -");
        normalized.push_str(&term);
    }
    Ok(normalized)
}
