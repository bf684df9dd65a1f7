//! Live session map.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::error::SendError;
use tokio::sync::{RwLock, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use midgaard_core::RoomId;
use midgaard_core::config::Config;

use crate::dispatcher::OutboundSender;
use crate::session::{Delivery, SessionEvent, SessionHandle, SessionState, SessionTask};
use crate::transport::LineConnector;

type SessionMap = Arc<RwLock<HashMap<RoomId, SessionHandle>>>;

/// What every new session is created with.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Remote `host:port`.
    pub host: String,
    pub command_prefix: char,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            host: config.mud.host.clone(),
            command_prefix: config.bridge.command_prefix,
        }
    }
}

/// A session's claim on its registry entry.
///
/// Releasing removes the entry only if it still belongs to the same session,
/// so a closing session never evicts its replacement.
pub(crate) struct SessionSlot {
    sessions: SessionMap,
    room_id: RoomId,
    generation: u64,
}

impl SessionSlot {
    pub(crate) async fn release(&self) -> bool {
        let mut sessions = self.sessions.write().await;
        let owned = sessions
            .get(&self.room_id)
            .is_some_and(|h| h.generation() == self.generation);
        if owned {
            sessions.remove(&self.room_id);
        }
        owned
    }
}

/// Maps each room to its one live session, creating sessions on demand.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: SessionMap,
    settings: Arc<SessionSettings>,
    connector: Arc<dyn LineConnector>,
    outbound: OutboundSender,
    /// Parent scope of every session.
    cancel: CancellationToken,
    tracker: TaskTracker,
    next_generation: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new(
        settings: SessionSettings,
        connector: Arc<dyn LineConnector>,
        outbound: OutboundSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            settings: Arc::new(settings),
            connector,
            outbound,
            cancel,
            tracker: TaskTracker::new(),
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Return the room's live session, starting one if there is none.
    ///
    /// Lookup and insertion happen under one write lock, so concurrent
    /// callers for the same room always get the same session.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn get_or_create(&self, room: &RoomId) -> SessionHandle {
        let mut sessions = self.sessions.write().await;

        if let Some(handle) = sessions.get(room)
            && !handle.is_closed()
        {
            return handle.clone();
        }

        let handle = self.spawn_session(room);
        sessions.insert(room.clone(), handle.clone());
        drop(sessions);
        handle
    }

    /// Queue an event on its room's session.
    ///
    /// Never waits on the session: the queue is unbounded, so events that
    /// arrive while it is still connecting are held in order. If the session
    /// closed between lookup and send, a fresh session is created and the
    /// send is tried once more.
    pub async fn deliver(&self, mut event: SessionEvent) -> Delivery {
        let room = event.message.room_id.clone();

        for _ in 0..2 {
            let handle = self.get_or_create(&room).await;
            match handle.send(event) {
                Ok(()) => return Delivery::Queued,
                Err(SendError(returned)) => {
                    debug!(room_id = %room, generation = handle.generation(), "Session closed under us");
                    event = returned;
                }
            }
        }
        warn!(room_id = %room, "Session closed twice in a row, event dropped");
        Delivery::Closed
    }

    fn spawn_session(&self, room: &RoomId) -> SessionHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let cancel = self.cancel.child_token();

        let task = SessionTask {
            room_id: room.clone(),
            host: self.settings.host.clone(),
            prefix: self.settings.command_prefix,
            connector: Arc::clone(&self.connector),
            events: events_rx,
            outbound: self.outbound.clone(),
            state: state_tx,
            cancel: cancel.clone(),
            slot: SessionSlot {
                sessions: Arc::clone(&self.sessions),
                room_id: room.clone(),
                generation,
            },
        };
        self.tracker.spawn(task.run());

        info!(room_id = %room, generation, "Session created");
        SessionHandle::new(room.clone(), generation, events_tx, state_rx, cancel)
    }

    pub async fn get(&self, room: &RoomId) -> Option<SessionHandle> {
        self.sessions.read().await.get(room).cloned()
    }

    pub async fn contains(&self, room: &RoomId) -> bool {
        self.sessions.read().await.contains_key(room)
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Close every session and wait up to `timeout` for their tasks to exit.
    /// Returns `false` if some were still running at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        for handle in &handles {
            handle.close();
        }
        self.tracker.close();

        let finished = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if finished {
            info!(sessions = handles.len(), "All sessions stopped");
        } else {
            warn!(
                remaining = self.tracker.len(),
                "Timed out waiting for sessions to stop"
            );
        }
        finished
    }
}
