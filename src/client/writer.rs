//! The writer actor: the single task permitted to push frames onto the
//! socket. Every public write operation funnels through its mpsc channel,
//! which is what gives the client its "exactly one owner writes at a time"
//! guarantee without holding a lock across the send.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::WsWriteSink;

pub(crate) const WRITE_BUFFER_SIZE: usize = 32;

/// Spawn the writer actor. It drains `rx` and writes each line as a text
/// frame until the channel closes or a send fails; either way the task
/// just ends; `send_line` callers notice because their `Sender` starts
/// returning errors once `rx` is dropped along with this task.
pub(crate) fn spawn(mut sink: WsWriteSink, mut rx: mpsc::Receiver<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            tracing::debug!(">> {}", line.trim_end());
            if let Err(e) = sink.send(Message::Text(line)).await {
                tracing::warn!("writer actor ending: {e}");
                break;
            }
        }
    })
}

/// Strip CR/LF from a caller-supplied field before it goes anywhere near a
/// wire command: without it a message body containing `\r\n` could forge a
/// second IRC command.
pub(crate) fn sanitize(s: &str) -> String {
    s.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}
