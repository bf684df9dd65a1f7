//! Chat boundary types.
//!
//! The bridge never talks to a chat server directly. It sees the chat side
//! through [`ChatClient`] and the [`ChatEvent`] values the client pushes into
//! its event channel.

use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Opaque, stable identifier of a chat room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of a chat participant (including the bridge itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A plain-text message posted in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub sender: UserId,
    pub room_id: RoomId,
    pub body: String,
    /// Replacement text when this event edits an earlier message.
    pub edited_body: Option<String>,
    /// Origin timestamp assigned by the chat server.
    pub timestamp: SystemTime,
}

impl MessageEvent {
    /// The text the sender means: the edit if there is one, else the body.
    pub fn effective_text(&self) -> &str {
        self.edited_body.as_deref().unwrap_or(&self.body)
    }

    /// How old the event is at `now`. Timestamps from the future count as zero.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.timestamp).unwrap_or(Duration::ZERO)
    }
}

/// A membership invite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteEvent {
    pub room_id: RoomId,
    pub inviter: UserId,
    pub invitee: UserId,
    /// Whether the inviter flagged the room as a 1:1 conversation.
    pub is_direct: bool,
}

/// Everything the chat side can push to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Message(MessageEvent),
    Invite(InviteEvent),
    /// Snapshot of rooms the server lists as direct conversations.
    DirectRooms(Vec<RoomId>),
}

/// Errors surfaced by a chat client.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Chat request failed: {0}")]
    Request(String),

    #[error("Chat server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Chat event channel closed")]
    ChannelClosed,
}

/// The chat collaborator used by the bridge.
#[async_trait]
pub trait ChatClient: Send + Sync + 'static {
    /// The bridge's own identity, used for self-echo suppression.
    fn user_id(&self) -> &UserId;

    /// Join a room the bridge was invited to.
    async fn join(&self, room: &RoomId) -> Result<(), ChatError>;

    /// Post a message carrying both a plain and an HTML body.
    async fn send_text(&self, room: &RoomId, plain: &str, html: &str) -> Result<(), ChatError>;

    /// Stream inbound events into `events` until `cancel` fires or the
    /// stream fails permanently.
    async fn stream_events(
        &self,
        events: mpsc::Sender<ChatEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str, edited: Option<&str>) -> MessageEvent {
        MessageEvent {
            sender: "@alice:example.org".into(),
            room_id: "!room:example.org".into(),
            body: body.to_string(),
            edited_body: edited.map(str::to_string),
            timestamp: SystemTime::now(),
        }
    }

    #[test]
    fn edit_supersedes_body() {
        assert_eq!(message("$lok", Some("$look")).effective_text(), "$look");
        assert_eq!(message("$look", None).effective_text(), "$look");
    }

    #[test]
    fn future_timestamp_has_zero_age() {
        let mut event = message("hi", None);
        let now = SystemTime::now();
        event.timestamp = now + Duration::from_secs(30);
        assert_eq!(event.age(now), Duration::ZERO);

        event.timestamp = now - Duration::from_secs(90);
        assert_eq!(event.age(now), Duration::from_secs(90));
    }

    #[test]
    fn ids_display_verbatim() {
        assert_eq!(RoomId::new("!abc:host").to_string(), "!abc:host");
        assert_eq!(UserId::from("@bot:host").as_str(), "@bot:host");
    }
}
