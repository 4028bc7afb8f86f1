//! A mock Twitch IRC server over a real TCP + WebSocket handshake, used by
//! the end-to-end tests to drive `Client` through realistic wire scenarios.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Install a `tracing` subscriber once per test binary, so `cargo test --
/// --nocapture` shows the client's own `debug!`/`info!` call sites
/// alongside assertion failures. Safe to call from every test: the second
/// and later calls just find a subscriber already installed.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

pub struct MockIrcServer {
    addr: SocketAddr,
    outgoing_tx: mpsc::Sender<String>,
    incoming_rx: mpsc::Receiver<String>,
}

impl MockIrcServer {
    pub async fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(32);
        let (incoming_tx, incoming_rx) = mpsc::channel::<String>(32);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (mut write, mut read) = ws_stream.split();

                loop {
                    tokio::select! {
                        Some(msg) = outgoing_rx.recv() => {
                            if write.send(Message::Text(msg)).await.is_err() {
                                break;
                            }
                        }
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = incoming_tx.send(text).await;
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                _ => {}
                            }
                        }
                    }
                }
            }
        });

        Self {
            addr,
            outgoing_tx,
            incoming_rx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Send one raw line, appending the wire-terminal `\r\n`.
    pub async fn send(&self, line: &str) {
        self.outgoing_tx.send(format!("{line}\r\n")).await.unwrap();
    }

    pub async fn recv(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), self.incoming_rx.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn expect_contains(&mut self, pattern: &str) -> String {
        let msg = self.recv().await.expect("expected a message but got none");
        assert!(msg.contains(pattern), "expected message containing '{pattern}', got: {msg}");
        msg
    }

    /// Reply with the standard `001` welcome so `connect()` completes.
    pub async fn send_welcome(&self) {
        self.send(":tmi.twitch.tv 001 testuser :GLHF!").await;
    }
}
