//! Top-level supervisor wiring the chat stream, router, dispatcher and
//! sessions together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use midgaard_core::config::Config;
use midgaard_core::{ChatClient, ChatError};

use crate::dispatcher::OutboundDispatcher;
use crate::registry::{DirectRooms, SessionRegistry, SessionSettings};
use crate::router::EventRouter;
use crate::transport::LineConnector;

/// Depth of the channel between the chat stream and the router.
const EVENT_BUFFER: usize = 256;

/// Errors that end [`Bridge::run`].
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Chat event stream failed: {0}")]
    Chat(#[from] ChatError),

    #[error("Bridge task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Sessions currently registered.
    pub sessions: usize,
    pub direct_rooms: usize,
}

/// Read-only view of a running bridge.
#[derive(Clone)]
pub struct BridgeHandle {
    registry: SessionRegistry,
    direct: DirectRooms,
}

impl BridgeHandle {
    pub async fn stats(&self) -> BridgeStats {
        BridgeStats {
            sessions: self.registry.len().await,
            direct_rooms: self.direct.len().await,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn direct_rooms(&self) -> &DirectRooms {
        &self.direct
    }
}

pub struct Bridge {
    chat: Arc<dyn ChatClient>,
    router: EventRouter,
    dispatcher: OutboundDispatcher,
    handle: BridgeHandle,
    /// Parent of every task the bridge starts.
    scope: CancellationToken,
    shutdown_timeout: Duration,
}

impl Bridge {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        connector: Arc<dyn LineConnector>,
        config: &Config,
    ) -> Self {
        let scope = CancellationToken::new();
        let (dispatcher, outbound) = OutboundDispatcher::new(Arc::clone(&chat));
        let registry = SessionRegistry::new(
            SessionSettings::from(config),
            connector,
            outbound,
            scope.child_token(),
        );
        let direct = DirectRooms::new();
        let router = EventRouter::new(
            Arc::clone(&chat),
            registry.clone(),
            direct.clone(),
            config.bridge.freshness_window(),
        );

        Self {
            chat,
            router,
            dispatcher,
            handle: BridgeHandle { registry, direct },
            scope,
            shutdown_timeout: config.bridge.shutdown_timeout(),
        }
    }

    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    /// Run until `cancel` fires or the chat stream ends, then stop every
    /// task and wait up to the shutdown timeout for sessions to exit.
    ///
    /// Returns an error if the chat stream failed permanently.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), BridgeError> {
        let Self {
            chat,
            router,
            dispatcher,
            handle,
            scope,
            shutdown_timeout,
        } = self;

        let user_id = chat.user_id().clone();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let mut sync_task = {
            let scope = scope.clone();
            tokio::spawn(async move { chat.stream_events(events_tx, scope).await })
        };
        let router_task = {
            let scope = scope.clone();
            tokio::spawn(async move { router.run(events_rx, scope).await })
        };
        let dispatcher_task = tokio::spawn(dispatcher.run(scope.clone()));
        info!(user_id = %user_id, "Bridge running");

        let finished = tokio::select! {
            () = cancel.cancelled() => {
                info!("Shutdown requested");
                None
            }
            joined = &mut sync_task => Some(joined),
        };
        scope.cancel();

        let sync_result = match finished {
            Some(joined) => joined,
            None => sync_task.await,
        };
        let result = match sync_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "Chat event stream failed");
                Err(BridgeError::Chat(e))
            }
            Err(e) => Err(BridgeError::Task(e)),
        };

        let stats = handle.stats().await;
        if let Err(e) = router_task.await {
            warn!(error = %e, "Event router task failed");
        }
        if let Err(e) = dispatcher_task.await {
            warn!(error = %e, "Outbound dispatcher task failed");
        }
        handle.registry().shutdown(shutdown_timeout).await;

        info!(
            sessions = stats.sessions,
            direct_rooms = stats.direct_rooms,
            "Bridge stopped"
        );
        result
    }
}
