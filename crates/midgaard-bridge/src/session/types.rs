//! Session types.

use midgaard_core::{MessageEvent, RoomId};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// A chat message queued for a session, tagged with the room's directness at
/// the time it was routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub message: MessageEvent,
    pub is_direct: bool,
}

/// Lifecycle of a session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote connection could not be opened.
    ConnectFailed,
    /// The remote side closed or errored.
    ConnectionLost,
    /// The session's scope was cancelled.
    Shutdown,
}

/// Result of handing an event to a session queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The session has closed; the event was not queued.
    Closed,
}

/// Registry-side handle to a running session.
///
/// Holds the sending half of the session queue, a view of its state, and its
/// cancellation scope. The session task owns everything else. The queue is
/// unbounded: events that arrive while connecting wait, they are never shed.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    room_id: RoomId,
    generation: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub(crate) fn new(
        room_id: RoomId,
        generation: u64,
        events: mpsc::UnboundedSender<SessionEvent>,
        state: watch::Receiver<SessionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            room_id,
            generation,
            events,
            state,
            cancel,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Distinguishes successive sessions for the same room.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // Err: the sender is gone, so the task has exited.
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Queue an event behind everything already queued.
    pub fn deliver(&self, event: SessionEvent) -> Delivery {
        match self.send(event) {
            Ok(()) => Delivery::Queued,
            Err(_) => Delivery::Closed,
        }
    }

    /// Like [`deliver`](Self::deliver), but hands the event back if the
    /// session has closed.
    pub(crate) fn send(&self, event: SessionEvent) -> Result<(), SendError<SessionEvent>> {
        self.events.send(event)
    }

    /// Cancel the session's scope, closing its remote connection.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.events.is_closed() || self.state() == SessionState::Closed
    }
}
