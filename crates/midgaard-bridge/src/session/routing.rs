//! Chat-to-line routing rules.

use std::time::{Duration, SystemTime};

use midgaard_core::{MessageEvent, UserId};

use super::types::SessionEvent;

/// Why a chat message is not eligible for forwarding at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Authored by the bridge itself.
    SelfEcho,
    /// At least as old as the freshness window.
    Stale { age: Duration },
}

/// Check whether a message may be routed to a session at all.
pub fn admit(
    message: &MessageEvent,
    own_user: &UserId,
    now: SystemTime,
    freshness_window: Duration,
) -> Result<(), IgnoreReason> {
    if &message.sender == own_user {
        return Err(IgnoreReason::SelfEcho);
    }
    let age = message.age(now);
    if age >= freshness_window {
        return Err(IgnoreReason::Stale { age });
    }
    Ok(())
}

/// Turn a queued event into the line to write to the remote server.
///
/// Direct rooms forward the text verbatim. Group rooms forward only text
/// starting with `prefix`, minus the prefix and surrounding spaces.
pub fn event_to_line(event: &SessionEvent, prefix: char) -> Option<String> {
    let text = event.message.effective_text();
    if event.is_direct {
        return Some(text.to_string());
    }
    text.strip_prefix(prefix)
        .map(|rest| rest.trim_matches(' ').to_string())
}
