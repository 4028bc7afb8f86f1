//! Errors returned from the public API.

use std::fmt;

/// Errors surfaced directly from fallible public calls.
///
/// `HandlerPanic` is deliberately not a variant here: a panicking user
/// handler is caught, formatted, and routed to the `on_error` handler slot
/// instead of being returned from whichever call triggered it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("invalid nick: {0}")]
    InvalidNick(String),

    #[error("invalid token")]
    InvalidToken,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("ping timed out waiting for a PONG")]
    Timeout,
}

impl Error {
    pub(crate) fn transport(cause: impl Into<anyhow::Error>) -> Self {
        Error::Transport(cause.into())
    }
}

/// Detail string for a caught handler panic, passed to `on_error`.
#[derive(Debug, Clone)]
pub struct HandlerPanic(pub String);

impl fmt::Display for HandlerPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler panicked: {}", self.0)
    }
}

impl std::error::Error for HandlerPanic {}
