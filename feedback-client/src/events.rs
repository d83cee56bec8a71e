use std::path::PathBuf;

use feedback_core::Message;
use tokio::sync::mpsc;

/// Everything the client reports to the application. Delivered over a channel so the
/// application consumes events on its own task; the client never calls into UI code.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected(String),
    Disconnected(String),
    MessageReceived(Message),
    Error(String),
    FileProgress {
        file_id: String,
        percent: u8,
    },
    FileDownloadCompleted {
        file_id: String,
        file_name: String,
        path: PathBuf,
    },
}

pub type EventSender = mpsc::UnboundedSender<ClientEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

/// Send an event; a dropped receiver only means nobody is listening any more.
pub fn emit_event(tx: &EventSender, event: ClientEvent) {
    if let Err(e) = tx.send(event) {
        tracing::debug!(event = ?e.0, "Event receiver dropped");
    }
}
