//! Routes each chat event to the right place.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use midgaard_core::{ChatClient, ChatEvent, InviteEvent, MessageEvent, RoomId};

use crate::registry::{DirectRooms, SessionRegistry};
use crate::session::{Delivery, IgnoreReason, SessionEvent, admit};

/// What the router did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Joined after an invite.
    Joined { room_id: RoomId, is_direct: bool },
    JoinFailed { room_id: RoomId },
    /// Invite addressed to someone else.
    InviteIgnored,
    /// Direct-room snapshot merged; `added` rooms were new.
    DirectMerged { added: usize },
    /// Message handed to its room's session.
    Delivered { room_id: RoomId, delivery: Delivery },
    /// Message not eligible for any session.
    Ignored(IgnoreReason),
}

/// Classifies inbound chat events and dispatches them.
pub struct EventRouter {
    chat: Arc<dyn ChatClient>,
    registry: SessionRegistry,
    direct: DirectRooms,
    freshness_window: Duration,
}

impl EventRouter {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        registry: SessionRegistry,
        direct: DirectRooms,
        freshness_window: Duration,
    ) -> Self {
        Self {
            chat,
            registry,
            direct,
            freshness_window,
        }
    }

    /// Route events from `events` until `cancel` fires or the stream ends.
    pub async fn run(&self, mut events: mpsc::Receiver<ChatEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                debug!("Chat event stream ended");
                break;
            };
            // A join or session lookup in flight must not hold up shutdown.
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                outcome = self.route(event) => outcome,
            };
            trace!(?outcome, "Routed chat event");
        }
        info!("Event router stopped");
    }

    pub async fn route(&self, event: ChatEvent) -> RouteOutcome {
        match event {
            ChatEvent::Invite(invite) => self.accept_invite(invite).await,
            ChatEvent::DirectRooms(rooms) => {
                let added = self.direct.merge(rooms).await;
                RouteOutcome::DirectMerged { added }
            }
            ChatEvent::Message(message) => self.route_message(message, SystemTime::now()).await,
        }
    }

    async fn accept_invite(&self, invite: InviteEvent) -> RouteOutcome {
        if &invite.invitee != self.chat.user_id() {
            trace!(room_id = %invite.room_id, invitee = %invite.invitee, "Invite for another user");
            return RouteOutcome::InviteIgnored;
        }

        if let Err(e) = self.chat.join(&invite.room_id).await {
            warn!(
                room_id = %invite.room_id,
                inviter = %invite.inviter,
                error = %e,
                "Failed to join room after invite"
            );
            return RouteOutcome::JoinFailed {
                room_id: invite.room_id,
            };
        }
        info!(room_id = %invite.room_id, inviter = %invite.inviter, "Joined room after invite");

        if invite.is_direct {
            self.direct.mark_direct(&invite.room_id).await;
            info!(room_id = %invite.room_id, "Room is a direct conversation");
        }
        RouteOutcome::Joined {
            room_id: invite.room_id,
            is_direct: invite.is_direct,
        }
    }

    async fn route_message(&self, message: MessageEvent, now: SystemTime) -> RouteOutcome {
        if let Err(reason) = admit(&message, self.chat.user_id(), now, self.freshness_window) {
            debug!(room_id = %message.room_id, ?reason, "Message ignored");
            return RouteOutcome::Ignored(reason);
        }

        let room_id = message.room_id.clone();
        let is_direct = self.direct.is_direct(&room_id).await;
        let delivery = self
            .registry
            .deliver(SessionEvent { message, is_direct })
            .await;
        RouteOutcome::Delivered { room_id, delivery }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use midgaard_core::UserId;

    use super::*;
    use crate::dispatcher::OutboundDispatcher;
    use crate::registry::SessionSettings;
    use crate::test_support::{ChatHarness, FakeChat, FakeConnector, FakeRemote};

    const BOT: &str = "@midgaard:example.org";

    struct Fixture {
        router: EventRouter,
        chat: Arc<FakeChat>,
        _harness: ChatHarness,
        connector: Arc<FakeConnector>,
        remotes: mpsc::UnboundedReceiver<FakeRemote>,
        registry: SessionRegistry,
        direct: DirectRooms,
    }

    fn fixture() -> Fixture {
        let (chat, harness) = FakeChat::new(BOT);
        let (connector, remotes) = FakeConnector::new();
        let (_dispatcher, outbound) = OutboundDispatcher::new(Arc::clone(&chat) as Arc<dyn ChatClient>);
        let registry = SessionRegistry::new(
            SessionSettings {
                host: "mud.example.org:4000".into(),
                command_prefix: '$',
            },
            Arc::clone(&connector) as Arc<dyn crate::transport::LineConnector>,
            outbound,
            CancellationToken::new(),
        );
        let direct = DirectRooms::new();
        let router = EventRouter::new(
            Arc::clone(&chat) as Arc<dyn ChatClient>,
            registry.clone(),
            direct.clone(),
            Duration::from_secs(60),
        );
        Fixture {
            router,
            chat,
            _harness: harness,
            connector,
            remotes,
            registry,
            direct,
        }
    }

    fn message(sender: &str, room: &str, body: &str, age: Duration) -> ChatEvent {
        ChatEvent::Message(MessageEvent {
            sender: UserId::new(sender),
            room_id: RoomId::new(room),
            body: body.into(),
            edited_body: None,
            timestamp: SystemTime::now() - age,
        })
    }

    fn invite(room: &str, invitee: &str, is_direct: bool) -> ChatEvent {
        ChatEvent::Invite(InviteEvent {
            room_id: RoomId::new(room),
            inviter: UserId::new("@alice:example.org"),
            invitee: UserId::new(invitee),
            is_direct,
        })
    }

    #[tokio::test]
    async fn direct_invite_joins_and_marks_room() {
        let f = fixture();
        let outcome = f.router.route(invite("!dm:x", BOT, true)).await;
        assert_eq!(
            outcome,
            RouteOutcome::Joined {
                room_id: RoomId::new("!dm:x"),
                is_direct: true
            }
        );
        assert_eq!(f.chat.joins(), vec![RoomId::new("!dm:x")]);
        assert!(f.direct.is_direct(&RoomId::new("!dm:x")).await);
    }

    #[tokio::test]
    async fn group_invite_joins_without_marking() {
        let f = fixture();
        f.router.route(invite("!group:x", BOT, false)).await;
        assert_eq!(f.chat.joins(), vec![RoomId::new("!group:x")]);
        assert!(!f.direct.is_direct(&RoomId::new("!group:x")).await);
    }

    #[tokio::test]
    async fn failed_join_does_not_mark_direct() {
        let f = fixture();
        f.chat.fail_joins(true);
        let outcome = f.router.route(invite("!dm:x", BOT, true)).await;
        assert_eq!(
            outcome,
            RouteOutcome::JoinFailed {
                room_id: RoomId::new("!dm:x")
            }
        );
        assert!(!f.direct.is_direct(&RoomId::new("!dm:x")).await);
    }

    #[tokio::test]
    async fn invite_for_someone_else_is_ignored() {
        let f = fixture();
        let outcome = f
            .router
            .route(invite("!x:x", "@bob:example.org", true))
            .await;
        assert_eq!(outcome, RouteOutcome::InviteIgnored);
        assert!(f.chat.joins().is_empty());
    }

    #[tokio::test]
    async fn direct_snapshot_merges() {
        let f = fixture();
        let outcome = f
            .router
            .route(ChatEvent::DirectRooms(vec![
                RoomId::new("!a:x"),
                RoomId::new("!b:x"),
            ]))
            .await;
        assert_eq!(outcome, RouteOutcome::DirectMerged { added: 2 });
        assert!(f.direct.is_direct(&RoomId::new("!b:x")).await);
    }

    #[tokio::test]
    async fn self_echo_never_creates_session() {
        let f = fixture();
        let outcome = f
            .router
            .route(message(BOT, "!a:x", "$look", Duration::ZERO))
            .await;
        assert_eq!(outcome, RouteOutcome::Ignored(IgnoreReason::SelfEcho));
        assert!(f.registry.is_empty().await);
        assert_eq!(f.connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn stale_message_is_dropped() {
        let f = fixture();
        let outcome = f
            .router
            .route(message(
                "@alice:example.org",
                "!a:x",
                "$look",
                Duration::from_secs(120),
            ))
            .await;
        assert!(matches!(
            outcome,
            RouteOutcome::Ignored(IgnoreReason::Stale { .. })
        ));
        assert!(f.registry.is_empty().await);
    }

    #[tokio::test]
    async fn message_tagged_with_current_directness() {
        let mut f = fixture();
        f.router
            .route(ChatEvent::DirectRooms(vec![RoomId::new("!dm:x")]))
            .await;

        let outcome = f
            .router
            .route(message("@alice:example.org", "!dm:x", "hello there", Duration::ZERO))
            .await;
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                room_id: RoomId::new("!dm:x"),
                delivery: Delivery::Queued
            }
        );
        let mut remote = f.remotes.recv().await.unwrap();
        assert_eq!(remote.next_written().await, "hello there");
    }

    #[tokio::test]
    async fn group_message_without_prefix_writes_nothing() {
        let mut f = fixture();
        f.router
            .route(message("@alice:example.org", "!g:x", "just chatting", Duration::ZERO))
            .await;
        f.router
            .route(message("@alice:example.org", "!g:x", "$ look ", Duration::ZERO))
            .await;

        let mut remote = f.remotes.recv().await.unwrap();
        assert_eq!(remote.next_written().await, "look");
        remote.assert_silent().await;
    }

    #[tokio::test]
    async fn run_stops_on_cancel_while_join_hangs() {
        let f = fixture();
        f.chat.hang_joins(true);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tx.send(invite("!dm:x", BOT, true)).await.unwrap();
        let run = f.router.run(rx, cancel.clone());
        tokio::pin!(run);
        // Let the router pick up the invite and block in join.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), &mut run)
                .await
                .is_err()
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap();
        assert!(!f.direct.is_direct(&RoomId::new("!dm:x")).await);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let f = fixture();
        let (_tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), f.router.run(rx, cancel))
            .await
            .unwrap();
    }
}
