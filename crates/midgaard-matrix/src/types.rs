//! Wire types for the subset of the client-server API the bridge uses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `GET /sync` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: Rooms,
    #[serde(default)]
    pub account_data: EventList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rooms {
    #[serde(default)]
    pub join: HashMap<String, JoinedRoom>,
    #[serde(default)]
    pub invite: HashMap<String, InvitedRoom>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: EventList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvitedRoom {
    #[serde(default)]
    pub invite_state: EventList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

/// A client event with its content left untyped.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub state_key: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub origin_server_ts: Option<u64>,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// `GET /account/whoami` response.
#[derive(Debug, Clone, Deserialize)]
pub struct WhoamiResponse {
    pub user_id: String,
}

/// Standard error body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errcode: String,
    #[serde(default)]
    pub error: String,
}

/// Content of the `m.room.message` events the bridge posts.
#[derive(Debug, Clone, Serialize)]
pub struct TextMessageContent<'a> {
    pub msgtype: &'static str,
    pub body: &'a str,
    pub format: &'static str,
    pub formatted_body: &'a str,
}

impl<'a> TextMessageContent<'a> {
    pub const fn html(body: &'a str, formatted_body: &'a str) -> Self {
        Self {
            msgtype: "m.text",
            body,
            format: "org.matrix.custom.html",
            formatted_body,
        }
    }
}
