//! The per-room session task.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use midgaard_core::RoomId;

use super::routing::event_to_line;
use super::types::{CloseReason, SessionEvent, SessionState};
use crate::dispatcher::{OutboundMessage, OutboundSender};
use crate::registry::SessionSlot;
use crate::transport::{LineConnection, LineConnector};

/// Owns one room's queue and, once connected, its remote connection.
pub(crate) struct SessionTask {
    pub(crate) room_id: RoomId,
    pub(crate) host: String,
    pub(crate) prefix: char,
    pub(crate) connector: Arc<dyn LineConnector>,
    pub(crate) events: mpsc::UnboundedReceiver<SessionEvent>,
    pub(crate) outbound: OutboundSender,
    pub(crate) state: watch::Sender<SessionState>,
    pub(crate) cancel: CancellationToken,
    pub(crate) slot: SessionSlot,
}

impl SessionTask {
    pub(crate) async fn run(mut self) {
        debug!(room_id = %self.room_id, host = %self.host, "Session connecting");

        let connected = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = self.connector.connect(&self.host, &self.cancel) => Some(result),
        };

        let reason = match connected {
            None => CloseReason::Shutdown,
            Some(Err(e)) => {
                warn!(room_id = %self.room_id, error = %e, "Session failed to connect");
                CloseReason::ConnectFailed
            }
            Some(Ok(conn)) => {
                self.state.send_replace(SessionState::Active);
                info!(room_id = %self.room_id, "Session active");
                self.pump(conn).await
            }
        };

        self.finish(reason).await;
    }

    /// Active loop: shuttle events to the remote side and lines back to chat
    /// until the connection is lost or the session is cancelled.
    async fn pump(&mut self, conn: LineConnection) -> CloseReason {
        let LineConnection {
            mut lines,
            writer,
            lost,
        } = conn;

        let reason = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break CloseReason::Shutdown,
                () = lost.cancelled() => {
                    // Lines read before the drop are still delivered.
                    while let Ok(line) = lines.try_recv() {
                        self.forward_line(line);
                    }
                    break CloseReason::ConnectionLost;
                }
                line = lines.recv() => match line {
                    Some(line) => self.forward_line(line),
                    None => break CloseReason::ConnectionLost,
                },
                event = self.events.recv() => {
                    let Some(event) = event else {
                        break CloseReason::Shutdown;
                    };
                    let Some(line) = event_to_line(&event, self.prefix) else {
                        trace!(room_id = %self.room_id, "Group message without prefix ignored");
                        continue;
                    };
                    let sent = tokio::select! {
                        biased;
                        () = lost.cancelled() => false,
                        sent = writer.send(line) => sent.is_ok(),
                    };
                    if !sent {
                        break if self.cancel.is_cancelled() {
                            CloseReason::Shutdown
                        } else {
                            CloseReason::ConnectionLost
                        };
                    }
                }
            }
        };

        lost.cancel();
        reason
    }

    fn forward_line(&self, line: String) {
        let message = OutboundMessage::new(self.room_id.clone(), line);
        if self.outbound.send(message).is_err() {
            debug!(room_id = %self.room_id, "Outbound dispatcher gone, line dropped");
        }
    }

    async fn finish(mut self, reason: CloseReason) {
        self.events.close();
        let mut dropped = 0usize;
        while self.events.try_recv().is_ok() {
            dropped += 1;
        }
        self.state.send_replace(SessionState::Closed);
        let removed = self.slot.release().await;

        match reason {
            CloseReason::Shutdown => {
                debug!(room_id = %self.room_id, dropped, "Session stopped");
            }
            CloseReason::ConnectFailed | CloseReason::ConnectionLost => {
                info!(
                    room_id = %self.room_id,
                    ?reason,
                    dropped,
                    deregistered = removed,
                    "Session closed"
                );
            }
        }
    }
}
