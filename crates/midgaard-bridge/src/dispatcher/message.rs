//! Outbound chat messages and their wire rendering.

use midgaard_core::RoomId;

/// A line of remote output bound for a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub room_id: RoomId,
    pub text: String,
}

/// Plain and HTML bodies sent together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub plain: String,
    pub html: String,
}

impl OutboundMessage {
    pub fn new(room_id: RoomId, text: impl Into<String>) -> Self {
        Self {
            room_id,
            text: text.into(),
        }
    }

    /// Render as a monospace block: a fenced block for plain-text clients and
    /// an escaped `<pre>` block for rich ones.
    pub fn render(&self) -> RenderedMessage {
        RenderedMessage {
            plain: format!("```\n{}\n```", self.text),
            html: format!("<pre>{}</pre>", escape_html(&self.text)),
        }
    }
}

/// Escape the five HTML-significant characters.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_fenced_and_preformatted() {
        let rendered = OutboundMessage::new(RoomId::new("!r:x"), "You see a sword.").render();
        assert_eq!(rendered.plain, "```\nYou see a sword.\n```");
        assert_eq!(rendered.html, "<pre>You see a sword.</pre>");
    }

    #[test]
    fn html_body_is_escaped() {
        let rendered = OutboundMessage::new(RoomId::new("!r:x"), "<Guard> says \"halt\" & 'stop'").render();
        assert_eq!(
            rendered.html,
            "<pre>&lt;Guard&gt; says &#34;halt&#34; &amp; &#39;stop&#39;</pre>"
        );
        // Plain text is left alone.
        assert_eq!(rendered.plain, "```\n<Guard> says \"halt\" & 'stop'\n```");
    }

    #[test]
    fn escape_passes_unicode_through() {
        assert_eq!(escape_html("café ☕"), "café ☕");
    }
}
