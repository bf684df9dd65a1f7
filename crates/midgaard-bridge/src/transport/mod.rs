//! Line transport to the remote text server.
//!
//! A connection is exposed as three independent pieces: a receiver of
//! inbound lines, a sender of outbound lines, and a token that fires when the
//! connection is lost.

mod connection;
mod tcp;
mod telnet;

pub use connection::{LineConnection, LineConnector, TransportError};
pub use tcp::TcpLineConnector;
pub use telnet::LineDecoder;
