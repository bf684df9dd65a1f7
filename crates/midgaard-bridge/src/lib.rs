//! midgaard bridge library
//!
//! Multiplexes chat rooms onto line-server sessions:
//! - Line transport (TCP, telnet-stripping line decoder)
//! - Per-room sessions and the registry that owns them
//! - Event router for invites, direct-room snapshots and messages
//! - Outbound dispatcher serializing replies to the chat client
//! - `Bridge` supervisor tying them together

pub mod bridge;
pub mod dispatcher;
pub mod registry;
pub mod router;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use bridge::{Bridge, BridgeError, BridgeHandle, BridgeStats};
