//! Per-room sessions.
//!
//! A session owns one remote line connection and one routing loop. It starts
//! in `Connecting`, queues events until the connection is up, and closes for
//! good when the connection drops; the registry then creates a fresh session
//! on the next event for the room.

mod routing;
mod task;
mod types;

pub use routing::{IgnoreReason, admit, event_to_line};
pub(crate) use task::SessionTask;
pub use types::{CloseReason, Delivery, SessionEvent, SessionHandle, SessionState};
