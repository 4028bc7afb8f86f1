//! Dial, capability negotiation, and the authentication wait — the
//! `Idle -> Connecting -> Authenticating -> Connected` leg of the FSM.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::event::{self, Classification, DomainEvent};
use crate::parser;

use super::writer;
use super::{ConnectionState, Inner, WsStream};

/// Dial `inner.url`, negotiate capabilities, authenticate, and wait for
/// `001`. On success, spawns the writer actor and the read pipeline and
/// leaves the client in `Connected`. On any failure, leaves it in
/// `Closed` and returns the error. `stop` is this connect cycle's
/// cancellation token; if it fires mid-dial or mid-auth the attempt is
/// abandoned without ever reaching `Connected`, so no `on_disconnect`
/// fires for it.
/// The auth wait is never allowed to run longer than this, regardless of
/// the caller's own deadline.
const MAX_AUTH_WAIT: Duration = Duration::from_secs(30);

pub(crate) async fn establish(
    inner: &Arc<Inner>,
    stop: CancellationToken,
    deadline: Duration,
) -> Result<(), Error> {
    let deadline = deadline.min(MAX_AUTH_WAIT);
    let outcome = tokio::time::timeout(deadline, dial_and_authenticate(inner, stop.clone())).await;

    let (write_tx, read, global_user_state) = match outcome {
        Ok(Ok(parts)) => parts,
        Ok(Err(e)) => {
            *inner.state.write().await = ConnectionState::Closed;
            return Err(e);
        }
        Err(_) => {
            *inner.state.write().await = ConnectionState::Closed;
            return Err(Error::transport(anyhow::anyhow!("connect deadline exceeded")));
        }
    };

    if let Some(gus) = global_user_state {
        *inner.global_state.write().await = Some(gus);
    }

    *inner.writer.write().await = Some(write_tx.clone());
    *inner.connected.write().await = true;
    *inner.state.write().await = ConnectionState::Connected;

    let read_task = super::pipeline::spawn(inner.clone(), read, stop);
    *inner.read_task.write().await = Some(read_task);

    let channels: Vec<String> = inner.channels.read().await.iter().map(str::to_string).collect();
    for channel in channels {
        let line = format!("JOIN #{channel}\r\n");
        if write_tx.send(line).await.is_err() {
            warn!("failed to restore channel {channel} on connect");
            break;
        }
    }

    if let Some(handler) = &inner.handlers.on_connect {
        if let Err(msg) = crate::handlers::invoke_guarded_nullary(handler) {
            super::invoke_error(inner, msg).await;
        }
    }

    info!("connected as {}", inner.nick);
    Ok(())
}

async fn dial_and_authenticate(
    inner: &Arc<Inner>,
    stop: CancellationToken,
) -> Result<(mpsc::Sender<String>, super::WsReadStream, Option<crate::event::GlobalUserState>), Error> {
    *inner.state.write().await = ConnectionState::Connecting;

    let ws_stream = tokio::select! {
        biased;
        () = stop.cancelled() => return Err(Error::transport(anyhow::anyhow!("connect cancelled"))),
        dialed = dial(&inner.url) => dialed?,
    };

    let (sink, mut read) = ws_stream.split();
    let (write_tx, write_rx) = mpsc::channel::<String>(writer::WRITE_BUFFER_SIZE);
    writer::spawn(sink, write_rx);

    *inner.state.write().await = ConnectionState::Authenticating;
    handshake(&write_tx, inner).await?;

    let global_user_state = tokio::select! {
        biased;
        () = stop.cancelled() => return Err(Error::transport(anyhow::anyhow!("connect cancelled"))),
        result = wait_for_welcome(&mut read, &write_tx) => result?,
    };

    Ok((write_tx, read, global_user_state))
}

async fn dial(raw_url: &str) -> Result<WsStream, Error> {
    let url = url::Url::parse(raw_url).map_err(|e| Error::transport(anyhow::anyhow!(e)))?;
    debug!("dialing {url}");
    let (stream, _response) = connect_async(url.to_string())
        .await
        .map_err(|e| Error::transport(anyhow::anyhow!(e)))?;
    Ok(stream)
}

async fn handshake(tx: &mpsc::Sender<String>, inner: &Inner) -> Result<(), Error> {
    let raw_token = inner.token_provider.token();
    if raw_token.trim().is_empty() {
        return Err(Error::InvalidToken);
    }

    let caps = inner.capabilities.join(" ");
    let token = crate::token::with_oauth_prefix(&raw_token);
    let nick = inner.nick.to_lowercase();

    tx.send(format!("CAP REQ :{caps}\r\n"))
        .await
        .map_err(|_| Error::transport(anyhow::anyhow!("writer gone during handshake")))?;
    tx.send(format!("PASS {token}\r\n"))
        .await
        .map_err(|_| Error::transport(anyhow::anyhow!("writer gone during handshake")))?;
    tx.send(format!("NICK {nick}\r\n"))
        .await
        .map_err(|_| Error::transport(anyhow::anyhow!("writer gone during handshake")))?;
    Ok(())
}

/// Read frames until `001` (success), an auth-failure `NOTICE` (failure),
/// or the read side ends/errors (failure). `GLOBALUSERSTATE` seen along
/// the way pre-warms the cache for the caller to apply.
async fn wait_for_welcome(
    read: &mut super::WsReadStream,
    write_tx: &mpsc::Sender<String>,
) -> Result<Option<crate::event::GlobalUserState>, Error> {
    let mut global_user_state = None;
    loop {
        let frame = read
            .next()
            .await
            .ok_or_else(|| Error::transport(anyhow::anyhow!("socket closed before welcome")))?
            .map_err(Error::from)?;

        let tokio_tungstenite::tungstenite::Message::Text(text) = frame else {
            continue;
        };

        for raw_line in text.split("\r\n").filter(|l| !l.is_empty()) {
            let line = parser::parse(raw_line);
            match line.command.as_str() {
                "001" => return Ok(global_user_state),
                "NOTICE" => {
                    if is_auth_failure(&line.trailing) {
                        return Err(Error::AuthFailed(line.trailing.clone()));
                    }
                }
                "GLOBALUSERSTATE" => {
                    if let Classification::Event(DomainEvent::GlobalUserState(gus)) =
                        event::classify(&line)
                    {
                        global_user_state = Some(gus);
                    }
                }
                "PING" => {
                    let _ = write_tx.send(format!("PONG :{}\r\n", line.trailing)).await;
                }
                _ => {}
            }
        }
    }
}

fn is_auth_failure(trailing: &str) -> bool {
    trailing.contains("Login authentication failed") || trailing.contains("Improperly formatted auth")
}
