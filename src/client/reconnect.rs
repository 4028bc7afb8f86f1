//! The reconnect controller: a dedicated task spawned by the read
//! pipeline's exit path whenever a previously-`Connected` client drops
//! while auto-reconnect is still enabled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::handlers;

use super::{connection, ConnectionState, Inner};

const RECONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn spawn(inner: Arc<Inner>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(inner))
}

async fn run(inner: Arc<Inner>) {
    loop {
        if !*inner.auto_reconnect.read().await {
            return;
        }

        let stop = inner.stop.read().await.clone();
        tokio::select! {
            () = tokio::time::sleep(inner.reconnect_delay) => {}
            () = stop.cancelled() => return,
        }

        if !*inner.auto_reconnect.read().await {
            return;
        }

        if let Some(handler) = &inner.handlers.on_reconnect {
            if let Err(msg) = handlers::invoke_guarded_nullary(handler) {
                super::invoke_error(&inner, msg).await;
            }
        }

        *inner.state.write().await = ConnectionState::Connecting;
        let attempt_stop = CancellationToken::new();
        *inner.stop.write().await = attempt_stop.clone();

        info!("reconnect attempt starting");
        match connection::establish(&inner, attempt_stop, RECONNECT_ATTEMPT_TIMEOUT).await {
            Ok(()) => return,
            Err(e) => {
                super::invoke_error(&inner, format!("reconnect attempt failed: {e}")).await;
            }
        }
    }
}
