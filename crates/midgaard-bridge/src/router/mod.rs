//! Inbound chat event classification.

mod inbound;

pub use inbound::{EventRouter, RouteOutcome};
