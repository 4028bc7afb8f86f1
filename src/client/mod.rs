//! `Client`, `ClientBuilder`, and the connection lifecycle that ties the
//! parser, event classifier, channel registry, and handler registry
//! together into a durable, self-healing Twitch chat connection.

mod connection;
mod pipeline;
mod reconnect;
mod writer;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelRegistry;
use crate::error::Error;
use crate::event::GlobalUserState;
use crate::handlers::{self, Handlers, HandlersBuilder};
use crate::token::TokenProvider;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsWriteSink = futures_util::stream::SplitSink<WsStream, tokio_tungstenite::tungstenite::Message>;
pub(crate) type WsReadStream = futures_util::stream::SplitStream<WsStream>;

const DEFAULT_URL: &str = "wss://irc-ws.chat.twitch.tv:443";
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn default_capabilities() -> Vec<String> {
    vec![
        "twitch.tv/tags".to_string(),
        "twitch.tv/commands".to_string(),
        "twitch.tv/membership".to_string(),
    ]
}

/// The connection's finite-state machine. `Reconnecting` is the pseudo-state
/// the pseudo-state a client passes through between a dropped `Connected`
/// entry and the reconnect controller's next successful dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Authenticating,
    Connected,
    Closing,
    Closed,
    Reconnecting,
}

pub(crate) struct Inner {
    nick: String,
    token_provider: Arc<dyn TokenProvider>,
    url: String,
    capabilities: Vec<String>,
    handlers: Handlers,
    reconnect_delay: Duration,
    default_auto_reconnect: bool,

    channels: RwLock<ChannelRegistry>,
    global_state: RwLock<Option<GlobalUserState>>,
    state: RwLock<ConnectionState>,
    auto_reconnect: RwLock<bool>,
    connected: RwLock<bool>,
    writer: RwLock<Option<mpsc::Sender<String>>>,
    pong_tx: watch::Sender<u64>,
    stop: RwLock<CancellationToken>,
    read_task: RwLock<Option<JoinHandle<()>>>,
    reconnect_task: RwLock<Option<JoinHandle<()>>>,
}

/// Builds a [`Client`]. Connection-level knobs: `url`, `auto_reconnect`,
/// `reconnect_delay`, `capabilities`, plus the handler registry.
pub struct ClientBuilder {
    nick: String,
    token_provider: Arc<dyn TokenProvider>,
    url: String,
    auto_reconnect: bool,
    reconnect_delay: Duration,
    capabilities: Vec<String>,
    handlers: Handlers,
}

impl ClientBuilder {
    /// `nick` is validated immediately: empty, or containing whitespace or
    /// CR/LF, is rejected as `InvalidNick`.
    pub fn new(nick: impl Into<String>, token_provider: Arc<dyn TokenProvider>) -> Result<Self, Error> {
        let nick = nick.into();
        if nick.is_empty() || nick.chars().any(char::is_whitespace) {
            return Err(Error::InvalidNick(nick));
        }
        Ok(Self {
            nick,
            token_provider,
            url: DEFAULT_URL.to_string(),
            auto_reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            capabilities: default_capabilities(),
            handlers: Handlers::default(),
        })
    }

    /// Override the WebSocket endpoint. Intended for pointing at a mock
    /// server in tests.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Configure handlers via [`HandlersBuilder`] inline instead of
    /// building one separately.
    #[must_use]
    pub fn with_handlers(self, build: impl FnOnce(HandlersBuilder) -> HandlersBuilder) -> Self {
        let handlers = build(HandlersBuilder::new()).build();
        self.handlers(handlers)
    }

    pub fn build(self) -> Client {
        let (pong_tx, _pong_rx) = watch::channel(0u64);
        let inner = Arc::new(Inner {
            nick: self.nick,
            token_provider: self.token_provider,
            url: self.url,
            capabilities: self.capabilities,
            handlers: self.handlers,
            reconnect_delay: self.reconnect_delay,
            default_auto_reconnect: self.auto_reconnect,
            channels: RwLock::new(ChannelRegistry::new()),
            global_state: RwLock::new(None),
            state: RwLock::new(ConnectionState::Idle),
            auto_reconnect: RwLock::new(self.auto_reconnect),
            connected: RwLock::new(false),
            writer: RwLock::new(None),
            pong_tx,
            stop: RwLock::new(CancellationToken::new()),
            read_task: RwLock::new(None),
            reconnect_task: RwLock::new(None),
        });
        Client { inner }
    }
}

/// A durable, self-healing Twitch chat connection. Cheaply `Clone`-able;
/// clones share the same underlying connection (it is reference-counted).
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Dial, negotiate capabilities, authenticate, and wait for the
    /// welcome numeric, with a 30s deadline. Fails with `AlreadyConnected`
    /// if a connection attempt is already underway or established.
    pub async fn connect(&self) -> Result<(), Error> {
        self.connect_with_timeout(DEFAULT_CONNECT_TIMEOUT).await
    }

    /// As [`Client::connect`], with an explicit deadline for the whole
    /// dial+handshake+auth-wait sequence. Internally clamped to at most
    /// 30s regardless of what's passed, so a stalled or malicious server
    /// can never hold the auth wait open longer than that.
    pub async fn connect_with_timeout(&self, deadline: Duration) -> Result<(), Error> {
        {
            let mut state = self.inner.state.write().await;
            if matches!(
                *state,
                ConnectionState::Connecting | ConnectionState::Authenticating | ConnectionState::Connected
            ) {
                return Err(Error::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }

        let stop = CancellationToken::new();
        *self.inner.stop.write().await = stop.clone();
        *self.inner.auto_reconnect.write().await = self.inner.default_auto_reconnect;

        connection::establish(&self.inner, stop, deadline).await
    }

    /// Terminal for this connection: stops the reconnect controller, cancels
    /// the read pipeline, and waits for both to exit. Idempotent — calling
    /// it more than once, including concurrently, is safe. The client may
    /// be reused for a fresh `connect()` afterward.
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.write().await;
            *state = ConnectionState::Closing;
        }
        *self.inner.auto_reconnect.write().await = false;
        self.inner.stop.read().await.cancel();

        if let Some(handle) = self.inner.read_task.write().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.inner.reconnect_task.write().await.take() {
            let _ = handle.await;
        }

        *self.inner.state.write().await = ConnectionState::Closed;
    }

    pub async fn is_connected(&self) -> bool {
        *self.inner.connected.read().await
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    /// The most recently observed `GLOBALUSERSTATE` snapshot, if any.
    pub async fn global_user_state(&self) -> Option<GlobalUserState> {
        self.inner.global_state.read().await.clone()
    }

    /// The channels this client is (or wants to be) joined to.
    pub async fn joined_channels(&self) -> Vec<String> {
        self.inner.channels.read().await.iter().map(str::to_string).collect()
    }

    /// Join one or more channels. Updates the registry unconditionally
    /// (restored automatically on the next `Connected` entry); if already
    /// connected, also sends `JOIN` immediately. The first send error
    /// aborts the remaining channels.
    pub async fn join<I, S>(&self, channels: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = channels.into_iter().map(|c| crate::channel::normalize(c.as_ref())).collect();
        {
            let mut registry = self.inner.channels.write().await;
            for name in &names {
                registry.join(name);
            }
        }
        if !self.is_connected().await {
            return Ok(());
        }
        for name in &names {
            self.send_line(format!("JOIN #{name}\r\n")).await?;
        }
        Ok(())
    }

    /// Symmetric to [`Client::join`]: removes from the registry even when
    /// disconnected, and sends `PART` only if connected.
    pub async fn part<I, S>(&self, channels: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = channels.into_iter().map(|c| crate::channel::normalize(c.as_ref())).collect();
        {
            let mut registry = self.inner.channels.write().await;
            for name in &names {
                registry.part(name);
            }
        }
        if !self.is_connected().await {
            return Ok(());
        }
        for name in &names {
            self.send_line(format!("PART #{name}\r\n")).await?;
        }
        Ok(())
    }

    /// `PRIVMSG #<channel> :<message>`.
    pub async fn say(&self, channel: &str, message: &str) -> Result<(), Error> {
        let channel = crate::channel::normalize(channel);
        let message = writer::sanitize(message);
        self.send_line(format!("PRIVMSG #{channel} :{message}\r\n")).await
    }

    /// `say`, with a `reply-parent-msg-id` tag threading the reply to
    /// `parent_msg_id`.
    pub async fn reply(&self, channel: &str, parent_msg_id: &str, message: &str) -> Result<(), Error> {
        let channel = crate::channel::normalize(channel);
        let parent_msg_id = writer::sanitize(parent_msg_id);
        let message = writer::sanitize(message);
        self.send_line(format!("@reply-parent-msg-id={parent_msg_id} PRIVMSG #{channel} :{message}\r\n"))
            .await
    }

    /// `PRIVMSG #jtv :/w <user> <message>` — the current (and, per Twitch,
    /// unstable) whisper wire convention.
    pub async fn whisper(&self, user: &str, message: &str) -> Result<(), Error> {
        let user = writer::sanitize(user);
        let message = writer::sanitize(message);
        self.send_line(format!("PRIVMSG #jtv :/w {user} {message}\r\n")).await
    }

    /// Send a `PING` and wait for the matching `PONG`, up to `timeout`.
    /// A fresh `watch` subscription is taken immediately before sending,
    /// so a pong that arrived before this call (a stale one) cannot
    /// satisfy this wait, so a burst of unrelated pongs queued up before the
    /// call can never be mistaken for the reply to it.
    pub async fn ping(&self, timeout: Duration) -> Result<(), Error> {
        if !self.is_connected().await {
            return Err(Error::NotConnected);
        }
        let mut rx = self.inner.pong_tx.subscribe();
        self.send_line("PING :tmi.twitch.tv\r\n".to_string()).await?;
        match tokio::time::timeout(timeout, rx.changed()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn send_line(&self, line: String) -> Result<(), Error> {
        let sender = self.inner.writer.read().await.clone();
        match sender {
            Some(tx) => tx.send(line).await.map_err(|_| Error::NotConnected),
            None => Err(Error::NotConnected),
        }
    }
}

/// Best-effort send used for automatic `PONG` replies from inside the read
/// pipeline — a failure here just means the socket is already dying, which
/// the pipeline's own read loop will discover and report on its own.
async fn send_raw(inner: &Inner, line: String) {
    if let Some(tx) = inner.writer.read().await.clone() {
        let _ = tx.send(line).await;
    }
}

/// Route a string to `on_error`, logging it regardless of whether anyone's
/// listening.
async fn invoke_error(inner: &Inner, message: String) {
    tracing::error!("{message}");
    if let Some(handler) = &inner.handlers.on_error {
        let _ = handlers::invoke_guarded(handler, message);
    }
}
