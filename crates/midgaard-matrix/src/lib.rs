//! Matrix chat client for the bridge.
//!
//! A thin reqwest-based client for the parts of the Matrix client-server API
//! the bridge needs: credential check, long-poll sync, joining rooms and
//! posting `m.room.message` events.

mod client;
mod convert;
mod error;
mod retry;
pub mod types;

pub use client::MatrixClient;
pub use convert::sync_events;
pub use error::MatrixError;
pub use retry::RetryPolicy;
