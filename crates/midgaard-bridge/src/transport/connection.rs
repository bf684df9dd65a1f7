//! Transport boundary types.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// An open line connection, owned by exactly one session.
///
/// `lost` is cancelled by the transport when the connection drops. Cancelling
/// it from the owning side closes the connection.
#[derive(Debug)]
pub struct LineConnection {
    /// Lines received from the remote server, in arrival order.
    pub lines: mpsc::Receiver<String>,
    /// Lines to write to the remote server, without line terminators.
    pub writer: mpsc::Sender<String>,
    /// Connection-lost signal.
    pub lost: CancellationToken,
}

/// Errors from opening a line connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("Timed out connecting to {host}")]
    Timeout { host: String },
}

/// Opens line connections to the remote server.
#[async_trait]
pub trait LineConnector: Send + Sync + 'static {
    /// Connect to `host`. The returned connection's `lost` token is a child
    /// of `scope`, so cancelling `scope` tears the connection down.
    async fn connect(
        &self,
        host: &str,
        scope: &CancellationToken,
    ) -> Result<LineConnection, TransportError>;
}
