//! The read pipeline: one task per connection, turning inbound frames into
//! handler calls until the socket dies or `close()` cancels it.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event::{self, Classification, DomainEvent};
use crate::handlers;
use crate::parser;

use super::{reconnect, ConnectionState, Inner};

pub(crate) fn spawn(
    inner: Arc<Inner>,
    mut read: super::WsReadStream,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run(&inner, &mut read, &stop).await;
        exit(&inner).await;
    })
}

async fn run(inner: &Arc<Inner>, read: &mut super::WsReadStream, stop: &CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => {
                debug!("read pipeline cancelled");
                return;
            }
            frame = read.next() => {
                match frame {
                    None => {
                        info!("socket ended");
                        return;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if handle_text(inner, &text).await.is_break() {
                            info!("server requested RECONNECT, ending read pipeline");
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("server sent close frame");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        super::invoke_error(inner, format!("read error: {e}")).await;
                        return;
                    }
                }
            }
        }
    }
}

/// `ControlFlow::Break` means a `RECONNECT` was seen: the caller should end
/// the read loop so the deferred exit path (shared with involuntary drops)
/// closes the socket and hands off to the reconnect controller.
async fn handle_text(inner: &Arc<Inner>, text: &str) -> std::ops::ControlFlow<()> {
    for raw_line in text.split("\r\n").filter(|l| !l.is_empty()) {
        if let Some(handler) = &inner.handlers.on_raw_message {
            if let Err(msg) = handlers::invoke_guarded(handler, raw_line.to_string()) {
                super::invoke_error(inner, msg).await;
            }
        }
        if dispatch_line(inner, raw_line).await.is_break() {
            return std::ops::ControlFlow::Break(());
        }
    }
    std::ops::ControlFlow::Continue(())
}

async fn dispatch_line(inner: &Arc<Inner>, raw_line: &str) -> std::ops::ControlFlow<()> {
    let line = parser::parse(raw_line);
    match event::classify(&line) {
        Classification::Ping(token) => {
            super::send_raw(inner, format!("PONG :{token}\r\n")).await;
        }
        Classification::Pong => {
            inner.pong_tx.send_modify(|seen| *seen = seen.wrapping_add(1));
        }
        Classification::Event(DomainEvent::Reconnect) => return std::ops::ControlFlow::Break(()),
        Classification::Event(ev) => dispatch_event(inner, ev).await,
        Classification::Ignored => {}
    }
    std::ops::ControlFlow::Continue(())
}

async fn dispatch_event(inner: &Arc<Inner>, event: DomainEvent) {
    match event {
        DomainEvent::ChatMessage(m) => invoke(inner, &inner.handlers.on_message, m).await,
        DomainEvent::UserNotice(n) => invoke(inner, &inner.handlers.on_user_notice, n).await,
        DomainEvent::RoomState(r) => invoke(inner, &inner.handlers.on_room_state, r).await,
        DomainEvent::Notice(n) => invoke(inner, &inner.handlers.on_notice, n).await,
        DomainEvent::ClearChat(c) => invoke(inner, &inner.handlers.on_clear_chat, c).await,
        DomainEvent::ClearMessage(c) => invoke(inner, &inner.handlers.on_clear_message, c).await,
        DomainEvent::Whisper(w) => invoke(inner, &inner.handlers.on_whisper, w).await,
        DomainEvent::GlobalUserState(g) => {
            *inner.global_state.write().await = Some(g.clone());
            invoke(inner, &inner.handlers.on_global_user_state, g).await;
        }
        DomainEvent::UserState(u) => invoke(inner, &inner.handlers.on_user_state, u).await,
        DomainEvent::Join { channel, user } => {
            invoke(inner, &inner.handlers.on_join, (channel, user)).await;
        }
        DomainEvent::Part { channel, user } => {
            invoke(inner, &inner.handlers.on_part, (channel, user)).await;
        }
        DomainEvent::Reconnect => unreachable!("handled in dispatch_line before reaching here"),
    }
}

async fn invoke<T>(inner: &Arc<Inner>, handler: &Option<crate::handlers::Callback<T>>, value: T)
where
    T: std::panic::UnwindSafe,
{
    if let Some(handler) = handler {
        if let Err(msg) = handlers::invoke_guarded(handler, value) {
            super::invoke_error(inner, msg).await;
        }
    }
}

/// Deferred exit path: flip `connected` off, drop the writer so its actor
/// ends, and — if this was a successful connection with auto-reconnect
/// still enabled — fire `on_disconnect` and hand off to the reconnect
/// controller. Both values are read under lock at the same moment to avoid
/// racing a concurrent `close()`.
async fn exit(inner: &Arc<Inner>) {
    let was_connected = {
        let mut connected = inner.connected.write().await;
        std::mem::replace(&mut *connected, false)
    };
    let auto_reconnect = *inner.auto_reconnect.read().await;

    inner.writer.write().await.take();

    {
        let mut state = inner.state.write().await;
        *state = if was_connected && auto_reconnect {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Closed
        };
    }

    if was_connected {
        if let Some(handler) = &inner.handlers.on_disconnect {
            if let Err(msg) = handlers::invoke_guarded_nullary(handler) {
                super::invoke_error(inner, msg).await;
            }
        }
    }

    if was_connected && auto_reconnect {
        let handle = reconnect::spawn(inner.clone());
        *inner.reconnect_task.write().await = Some(handle);
    } else {
        debug!("read pipeline exiting without reconnect (connected={was_connected}, auto_reconnect={auto_reconnect})");
    }
}
