//! Sync payload to [`ChatEvent`] conversion.

use std::time::{Duration, UNIX_EPOCH};

use serde_json::Value;
use tracing::trace;

use midgaard_core::{ChatEvent, InviteEvent, MessageEvent, RoomId, UserId};

use crate::types::{RawEvent, SyncResponse};

/// Extract the events the bridge cares about from one sync response.
///
/// Account data comes first so direct-room state is up to date before the
/// messages of the same batch are routed.
pub fn sync_events(response: &SyncResponse, own_user: &UserId) -> Vec<ChatEvent> {
    let mut out = Vec::new();

    for event in &response.account_data.events {
        if event.event_type == "m.direct" {
            out.push(ChatEvent::DirectRooms(direct_rooms(&event.content)));
        }
    }

    for (room_id, room) in &response.rooms.join {
        for event in &room.timeline.events {
            if let Some(message) = text_message(room_id, event) {
                out.push(ChatEvent::Message(message));
            }
        }
    }

    for (room_id, room) in &response.rooms.invite {
        for event in &room.invite_state.events {
            if let Some(invite) = invite_for(room_id, event, own_user) {
                out.push(ChatEvent::Invite(invite));
            }
        }
    }

    out
}

fn text_message(room_id: &str, event: &RawEvent) -> Option<MessageEvent> {
    if event.event_type != "m.room.message" {
        return None;
    }
    let content = &event.content;
    if content.get("msgtype").and_then(Value::as_str) != Some("m.text") {
        trace!(room_id, "Skipping non-text message");
        return None;
    }
    let sender = event.sender.as_deref()?;
    let body = content.get("body").and_then(Value::as_str)?;
    let edited_body = content
        .get("m.new_content")
        .and_then(|new| new.get("body"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let timestamp = event
        .origin_server_ts
        .map_or(UNIX_EPOCH, |ms| UNIX_EPOCH + Duration::from_millis(ms));

    Some(MessageEvent {
        sender: UserId::new(sender),
        room_id: RoomId::new(room_id),
        body: body.to_string(),
        edited_body,
        timestamp,
    })
}

fn invite_for(room_id: &str, event: &RawEvent, own_user: &UserId) -> Option<InviteEvent> {
    if event.event_type != "m.room.member" {
        return None;
    }
    if event.state_key.as_deref() != Some(own_user.as_str()) {
        return None;
    }
    if event.content.get("membership").and_then(Value::as_str) != Some("invite") {
        return None;
    }
    Some(InviteEvent {
        room_id: RoomId::new(room_id),
        inviter: UserId::new(event.sender.clone().unwrap_or_default()),
        invitee: own_user.clone(),
        is_direct: event
            .content
            .get("is_direct")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// `m.direct` content maps each peer to the list of its direct rooms.
fn direct_rooms(content: &Value) -> Vec<RoomId> {
    content
        .as_object()
        .into_iter()
        .flat_map(|peers| peers.values())
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(Value::as_str)
        .map(RoomId::new)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn bot() -> UserId {
        UserId::new("@midgaard:example.org")
    }

    fn parse(value: Value) -> SyncResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn text_messages_become_message_events() {
        let response = parse(json!({
            "next_batch": "s1",
            "rooms": { "join": { "!room:example.org": { "timeline": { "events": [
                {
                    "type": "m.room.message",
                    "sender": "@alice:example.org",
                    "origin_server_ts": 1_700_000_000_000_u64,
                    "content": { "msgtype": "m.text", "body": "$look" }
                },
                {
                    "type": "m.room.message",
                    "sender": "@alice:example.org",
                    "origin_server_ts": 1_700_000_000_500_u64,
                    "content": { "msgtype": "m.image", "body": "cat.png" }
                },
                {
                    "type": "m.room.topic",
                    "sender": "@alice:example.org",
                    "content": { "topic": "dragons" }
                }
            ]}}}}
        }));

        let events = sync_events(&response, &bot());
        assert_eq!(events.len(), 1);
        let ChatEvent::Message(message) = &events[0] else {
            unreachable!("expected a message");
        };
        assert_eq!(message.body, "$look");
        assert_eq!(message.room_id.as_str(), "!room:example.org");
        assert_eq!(message.sender.as_str(), "@alice:example.org");
        assert_eq!(
            message.timestamp,
            UNIX_EPOCH + Duration::from_millis(1_700_000_000_000)
        );
        assert!(message.edited_body.is_none());
    }

    #[test]
    fn edits_carry_new_content_body() {
        let response = parse(json!({
            "next_batch": "s2",
            "rooms": { "join": { "!room:example.org": { "timeline": { "events": [{
                "type": "m.room.message",
                "sender": "@alice:example.org",
                "origin_server_ts": 1_u64,
                "content": {
                    "msgtype": "m.text",
                    "body": "* $look north",
                    "m.new_content": { "msgtype": "m.text", "body": "$look north" },
                    "m.relates_to": { "rel_type": "m.replace", "event_id": "$orig" }
                }
            }]}}}}
        }));

        let events = sync_events(&response, &bot());
        let ChatEvent::Message(message) = &events[0] else {
            unreachable!("expected a message");
        };
        assert_eq!(message.effective_text(), "$look north");
    }

    #[test]
    fn invites_for_own_user_only() {
        let response = parse(json!({
            "next_batch": "s3",
            "rooms": { "invite": {
                "!dm:example.org": { "invite_state": { "events": [
                    {
                        "type": "m.room.member",
                        "sender": "@alice:example.org",
                        "state_key": "@midgaard:example.org",
                        "content": { "membership": "invite", "is_direct": true }
                    },
                    {
                        "type": "m.room.member",
                        "sender": "@alice:example.org",
                        "state_key": "@alice:example.org",
                        "content": { "membership": "join" }
                    }
                ]}},
                "!other:example.org": { "invite_state": { "events": [{
                    "type": "m.room.member",
                    "sender": "@alice:example.org",
                    "state_key": "@bob:example.org",
                    "content": { "membership": "invite" }
                }]}}
            }}
        }));

        let events = sync_events(&response, &bot());
        assert_eq!(
            events,
            vec![ChatEvent::Invite(InviteEvent {
                room_id: RoomId::new("!dm:example.org"),
                inviter: UserId::new("@alice:example.org"),
                invitee: bot(),
                is_direct: true,
            })]
        );
    }

    #[test]
    fn direct_account_data_lists_every_room() {
        let response = parse(json!({
            "next_batch": "s4",
            "account_data": { "events": [{
                "type": "m.direct",
                "content": {
                    "@alice:example.org": ["!a:example.org", "!b:example.org"],
                    "@bob:example.org": ["!c:example.org"]
                }
            }]}
        }));

        let events = sync_events(&response, &bot());
        let ChatEvent::DirectRooms(mut rooms) = events[0].clone() else {
            unreachable!("expected direct rooms");
        };
        rooms.sort();
        assert_eq!(
            rooms,
            vec![
                RoomId::new("!a:example.org"),
                RoomId::new("!b:example.org"),
                RoomId::new("!c:example.org"),
            ]
        );
    }

    #[test]
    fn account_data_precedes_messages() {
        let response = parse(json!({
            "next_batch": "s5",
            "account_data": { "events": [{
                "type": "m.direct",
                "content": { "@alice:example.org": ["!room:example.org"] }
            }]},
            "rooms": { "join": { "!room:example.org": { "timeline": { "events": [{
                "type": "m.room.message",
                "sender": "@alice:example.org",
                "origin_server_ts": 1_u64,
                "content": { "msgtype": "m.text", "body": "hello" }
            }]}}}}
        }));

        let events = sync_events(&response, &bot());
        assert!(matches!(events[0], ChatEvent::DirectRooms(_)));
        assert!(matches!(events[1], ChatEvent::Message(_)));
    }

    #[test]
    fn empty_sync_yields_nothing() {
        let response = parse(json!({ "next_batch": "s0" }));
        assert!(sync_events(&response, &bot()).is_empty());
    }
}
