//! A durable, self-healing client for the IRC side of Twitch chat: IRCv3
//! message parsing, a connection lifecycle state machine, channel-membership
//! bookkeeping, and a small write surface (join/part/say/reply/whisper/ping).
//!
//! HTTP/REST endpoint wrappers, OAuth token acquisition/refresh, and EventSub
//! subscription plumbing are out of scope — see [`token::TokenProvider`] for
//! the seam an external OAuth implementation plugs into.

pub mod channel;
pub mod client;
pub mod error;
pub mod event;
pub mod handlers;
pub mod parser;
pub mod token;

pub use client::{Client, ClientBuilder, ConnectionState};
pub use error::{Error, HandlerPanic};
pub use event::{Badge, DomainEvent, Emote};
pub use handlers::{Handlers, HandlersBuilder};
pub use token::{StaticToken, TokenProvider};
