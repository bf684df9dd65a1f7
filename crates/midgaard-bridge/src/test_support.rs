//! In-process fakes for the chat client and the line connector.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use midgaard_core::{ChatClient, ChatError, ChatEvent, RoomId, UserId};

use crate::transport::{LineConnection, LineConnector, TransportError};

/// How long `next_*` helpers wait before failing the test.
pub const WAIT: Duration = Duration::from_secs(5);

/// A message the bridge sent to chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub room_id: RoomId,
    pub plain: String,
    pub html: String,
}

/// Fake chat client. Events are injected through [`ChatHarness::events`];
/// sends show up on [`ChatHarness::sent`].
pub struct FakeChat {
    user_id: UserId,
    joins: Mutex<Vec<RoomId>>,
    fail_joins: AtomicBool,
    hang_joins: AtomicBool,
    fail_sends: AtomicBool,
    fail_stream: AtomicBool,
    sent_tx: mpsc::UnboundedSender<SentMessage>,
    inbound: tokio::sync::Mutex<Option<mpsc::Receiver<ChatEvent>>>,
}

/// Test-side ends of a [`FakeChat`].
pub struct ChatHarness {
    pub events: mpsc::Sender<ChatEvent>,
    pub sent: mpsc::UnboundedReceiver<SentMessage>,
}

impl ChatHarness {
    pub async fn send(&self, event: ChatEvent) {
        self.events.send(event).await.expect("event stream closed");
    }

    pub async fn next_sent(&mut self) -> SentMessage {
        tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for a chat send")
            .expect("chat send channel closed")
    }
}

impl FakeChat {
    pub fn new(user_id: &str) -> (Arc<Self>, ChatHarness) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let chat = Arc::new(Self {
            user_id: UserId::new(user_id),
            joins: Mutex::new(Vec::new()),
            fail_joins: AtomicBool::new(false),
            hang_joins: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            fail_stream: AtomicBool::new(false),
            sent_tx,
            inbound: tokio::sync::Mutex::new(Some(events_rx)),
        });
        let harness = ChatHarness {
            events: events_tx,
            sent: sent_rx,
        };
        (chat, harness)
    }

    /// Rooms joined so far, in order.
    pub fn joins(&self) -> Vec<RoomId> {
        self.joins.lock().unwrap().clone()
    }

    pub fn fail_joins(&self, fail: bool) {
        self.fail_joins.store(fail, Ordering::SeqCst);
    }

    /// Make every join wait forever, like a homeserver that never answers.
    pub fn hang_joins(&self, hang: bool) {
        self.hang_joins.store(hang, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make the event stream end with an error once the harness's event
    /// sender is dropped.
    pub fn fail_stream(&self, fail: bool) {
        self.fail_stream.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    async fn join(&self, room: &RoomId) -> Result<(), ChatError> {
        if self.hang_joins.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_joins.load(Ordering::SeqCst) {
            return Err(ChatError::Rejected {
                status: 403,
                message: "not invited".into(),
            });
        }
        self.joins.lock().unwrap().push(room.clone());
        Ok(())
    }

    async fn send_text(&self, room: &RoomId, plain: &str, html: &str) -> Result<(), ChatError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::Request("send failed".into()));
        }
        let _ = self.sent_tx.send(SentMessage {
            room_id: room.clone(),
            plain: plain.into(),
            html: html.into(),
        });
        Ok(())
    }

    async fn stream_events(
        &self,
        events: mpsc::Sender<ChatEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ChatError> {
        let Some(mut inbound) = self.inbound.lock().await.take() else {
            cancel.cancelled().await;
            return Ok(());
        };
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                event = inbound.recv() => event,
            };
            let Some(event) = event else { break };
            if events.send(event).await.is_err() {
                return Err(ChatError::ChannelClosed);
            }
        }
        if self.fail_stream.load(Ordering::SeqCst) {
            return Err(ChatError::Rejected {
                status: 401,
                message: "token revoked".into(),
            });
        }
        cancel.cancelled().await;
        Ok(())
    }
}

/// Test-side ends of one fake remote connection.
pub struct FakeRemote {
    pub host: String,
    /// Lines the session wrote.
    pub written: mpsc::Receiver<String>,
    /// Lines to hand to the session as remote output.
    pub lines: mpsc::Sender<String>,
    pub lost: CancellationToken,
}

impl FakeRemote {
    pub async fn next_written(&mut self) -> String {
        tokio::time::timeout(WAIT, self.written.recv())
            .await
            .expect("timed out waiting for a remote write")
            .expect("remote writer closed")
    }

    /// Assert nothing is written within a short grace period.
    pub async fn assert_silent(&mut self) {
        let result = tokio::time::timeout(Duration::from_millis(100), self.written.recv()).await;
        if let Ok(Some(line)) = result {
            panic!("unexpected remote write: {line:?}");
        }
    }

    pub async fn say(&self, line: &str) {
        self.lines.send(line.to_string()).await.expect("session gone");
    }

    /// Simulate the remote server hanging up.
    pub fn drop_connection(&self) {
        self.lost.cancel();
    }
}

/// Fake connector. Each successful connect hands a [`FakeRemote`] to the
/// test through the receiver returned by the constructor. Dropping a
/// `FakeRemote` counts as losing the connection.
pub struct FakeConnector {
    connects: AtomicUsize,
    delay: Option<Duration>,
    fail: AtomicBool,
    remotes: mpsc::UnboundedSender<FakeRemote>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRemote>) {
        Self::build(None)
    }

    /// Connects take `delay` before succeeding.
    pub fn with_delay(delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRemote>) {
        Self::build(Some(delay))
    }

    fn build(delay: Option<Duration>) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            connects: AtomicUsize::new(0),
            delay,
            fail: AtomicBool::new(false),
            remotes: tx,
        });
        (connector, rx)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LineConnector for FakeConnector {
    async fn connect(
        &self,
        host: &str,
        scope: &CancellationToken,
    ) -> Result<LineConnection, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::select! {
                () = scope.cancelled() => {
                    return Err(TransportError::Connect {
                        host: host.into(),
                        reason: "cancelled".into(),
                    });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                host: host.into(),
                reason: "connection refused".into(),
            });
        }

        let (lines_tx, lines_rx) = mpsc::channel(64);
        let (writer_tx, writer_rx) = mpsc::channel(64);
        let lost = scope.child_token();
        let _ = self.remotes.send(FakeRemote {
            host: host.into(),
            written: writer_rx,
            lines: lines_tx,
            lost: lost.clone(),
        });
        Ok(LineConnection {
            lines: lines_rx,
            writer: writer_tx,
            lost,
        })
    }
}
