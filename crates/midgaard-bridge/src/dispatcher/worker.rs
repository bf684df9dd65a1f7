//! The outbound dispatcher task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use midgaard_core::ChatClient;

use super::message::OutboundMessage;

/// The dispatcher has stopped; the message was not queued.
#[derive(Debug, thiserror::Error)]
#[error("Outbound dispatcher is closed")]
pub struct DispatcherClosed(pub OutboundMessage);

/// Cloneable handle sessions use to queue outbound messages.
///
/// The queue is unbounded so a session never waits on chat delivery.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl OutboundSender {
    pub fn send(&self, message: OutboundMessage) -> Result<(), DispatcherClosed> {
        self.tx.send(message).map_err(|e| DispatcherClosed(e.0))
    }
}

/// Single serialization point between sessions and the chat client.
pub struct OutboundDispatcher {
    chat: Arc<dyn ChatClient>,
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl OutboundDispatcher {
    pub fn new(chat: Arc<dyn ChatClient>) -> (Self, OutboundSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { chat, rx }, OutboundSender { tx })
    }

    /// Send queued messages one at a time until `cancel` fires or every
    /// sender is gone. Nothing is drained after cancellation.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut sent: u64 = 0;
        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                message = self.rx.recv() => message,
            };
            let Some(message) = message else {
                debug!("All outbound senders dropped");
                break;
            };

            let rendered = message.render();
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.chat.send_text(&message.room_id, &rendered.plain, &rendered.html) => result,
            };
            match result {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(room_id = %message.room_id, error = %e, "Failed to send message to chat");
                }
            }
        }
        self.rx.close();
        info!(sent, "Outbound dispatcher stopped");
    }
}
