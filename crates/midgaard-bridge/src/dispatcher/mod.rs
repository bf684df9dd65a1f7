//! Outbound path from sessions to the chat client.

mod message;
mod worker;

pub use message::{OutboundMessage, RenderedMessage, escape_html};
pub use worker::{DispatcherClosed, OutboundDispatcher, OutboundSender};
