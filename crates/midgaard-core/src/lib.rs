//! `midgaard` Core Library
//!
//! Shared functionality for the bridge components:
//! - Configuration resolution (defaults, settings file, overrides)
//! - Chat boundary types and the `ChatClient` trait
//! - Tracing initialization
//! - Common error types

pub mod chat;
pub mod config;
pub mod error;
pub mod tracing_init;

pub use chat::{ChatClient, ChatError, ChatEvent, InviteEvent, MessageEvent, RoomId, UserId};
pub use config::Config;
pub use error::{Error, Result};
