//! The seam an externally-owned OAuth/OIDC implementation plugs into.
//!
//! Token acquisition and refresh are explicitly out of scope for this
//! crate — they belong to a `TokenProvider` the caller supplies. This crate
//! only normalizes whatever string it gets into the `oauth:<token>` form
//! Twitch's `PASS` command expects.

/// Supplies the OAuth token to authenticate with. Implementations are
/// free to cache, refresh, or block as needed; `token()` is called once
/// per connection attempt.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> String;
}

/// A [`TokenProvider`] that always returns the same token. Useful for
/// tests and for callers who manage refresh themselves and just want to
/// swap the held string.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> String {
        self.0.clone()
    }
}

/// Prefix `oauth:` onto `token` unless it's already present.
pub fn with_oauth_prefix(token: &str) -> String {
    if token.starts_with("oauth:") {
        token.to_string()
    } else {
        format!("oauth:{token}")
    }
}
