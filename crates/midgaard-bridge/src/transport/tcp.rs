//! TCP line transport.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{LineConnection, LineConnector, TransportError};
use super::telnet::LineDecoder;

const READ_BUFFER: usize = 4096;

/// Connects to the remote server over plain TCP.
#[derive(Debug, Clone)]
pub struct TcpLineConnector {
    connect_timeout: Duration,
    /// Depth of the inbound and outbound line queues.
    queue_capacity: usize,
}

impl Default for TcpLineConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            queue_capacity: 256,
        }
    }
}

impl TcpLineConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..Default::default()
        }
    }
}

#[async_trait]
impl LineConnector for TcpLineConnector {
    async fn connect(
        &self,
        host: &str,
        scope: &CancellationToken,
    ) -> Result<LineConnection, TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(host))
            .await
            .map_err(|_| TransportError::Timeout {
                host: host.to_string(),
            })?
            .map_err(|e| TransportError::Connect {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(host, error = %e, "Failed to set TCP_NODELAY");
        }
        info!(host, "Connected to line server");

        let (read_half, write_half) = stream.into_split();
        let lost = scope.child_token();
        let (lines_tx, lines_rx) = mpsc::channel(self.queue_capacity);
        let (writer_tx, writer_rx) = mpsc::channel(self.queue_capacity);

        tokio::spawn(read_lines(
            host.to_string(),
            read_half,
            lines_tx,
            lost.clone(),
        ));
        tokio::spawn(write_lines(
            host.to_string(),
            write_half,
            writer_rx,
            lost.clone(),
        ));

        Ok(LineConnection {
            lines: lines_rx,
            writer: writer_tx,
            lost,
        })
    }
}

/// Reader task: decode inbound bytes into lines until EOF, an I/O error, or
/// `lost` being cancelled. Always leaves `lost` cancelled.
async fn read_lines(
    host: String,
    mut read_half: OwnedReadHalf,
    lines_tx: mpsc::Sender<String>,
    lost: CancellationToken,
) {
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER];

    loop {
        let read = tokio::select! {
            () = lost.cancelled() => break,
            read = read_half.read(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                if let Some(line) = decoder.finish() {
                    let _ = lines_tx.send(line).await;
                }
                info!(host = %host, "Line server closed the connection");
                break;
            }
            Ok(n) => {
                for line in decoder.feed(&buf[..n]) {
                    if lines_tx.send(line).await.is_err() {
                        debug!(host = %host, "Line receiver dropped");
                        lost.cancel();
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(host = %host, error = %e, "Read from line server failed");
                break;
            }
        }
    }
    lost.cancel();
    debug!(host = %host, "Line reader finished");
}

/// Writer task: write each queued line with a CRLF terminator.
async fn write_lines(
    host: String,
    mut write_half: OwnedWriteHalf,
    mut writer_rx: mpsc::Receiver<String>,
    lost: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            () = lost.cancelled() => break,
            line = writer_rx.recv() => line,
        };
        let Some(line) = line else {
            break;
        };
        let written = async {
            write_half.write_all(line.as_bytes()).await?;
            write_half.write_all(b"\r\n").await?;
            write_half.flush().await
        };
        let written = tokio::select! {
            () = lost.cancelled() => break,
            written = written => written,
        };
        if let Err(e) = written {
            warn!(host = %host, error = %e, "Write to line server failed");
            break;
        }
    }
    lost.cancel();
    let _ = write_half.shutdown().await;
    debug!(host = %host, "Line writer finished");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn exchanges_lines_with_server() {
        let (listener, addr) = listener().await;
        let scope = CancellationToken::new();
        let connector = TcpLineConnector::default();

        let (conn, accepted) = tokio::join!(connector.connect(&addr, &scope), listener.accept());
        let mut conn = conn.unwrap();
        let (mut server, _) = accepted.unwrap();

        server.write_all(b"Welcome!\r\nBy what name").await.unwrap();
        server.write_all(b" do you wish to be known?\r\n").await.unwrap();
        assert_eq!(conn.lines.recv().await.unwrap(), "Welcome!");
        assert_eq!(
            conn.lines.recv().await.unwrap(),
            "By what name do you wish to be known?"
        );

        conn.writer.send("look".into()).await.unwrap();
        let mut reader = BufReader::new(&mut server);
        let mut received = String::new();
        reader.read_line(&mut received).await.unwrap();
        assert_eq!(received, "look\r\n");
        assert!(!conn.lost.is_cancelled());
    }

    #[tokio::test]
    async fn server_close_fires_lost_after_last_line() {
        let (listener, addr) = listener().await;
        let scope = CancellationToken::new();
        let connector = TcpLineConnector::default();

        let (conn, accepted) = tokio::join!(connector.connect(&addr, &scope), listener.accept());
        let mut conn = conn.unwrap();
        let (mut server, _) = accepted.unwrap();

        server.write_all(b"Goodbye.").await.unwrap();
        drop(server);

        tokio::time::timeout(Duration::from_secs(5), conn.lost.cancelled())
            .await
            .unwrap();
        assert_eq!(conn.lines.recv().await.unwrap(), "Goodbye.");
    }

    #[tokio::test]
    async fn cancelling_scope_closes_socket() {
        let (listener, addr) = listener().await;
        let scope = CancellationToken::new();
        let connector = TcpLineConnector::default();

        let (conn, accepted) = tokio::join!(connector.connect(&addr, &scope), listener.accept());
        let conn = conn.unwrap();
        let (mut server, _) = accepted.unwrap();

        scope.cancel();
        assert!(conn.lost.is_cancelled());

        // The server observes EOF once both halves are dropped.
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), server.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let (listener, addr) = listener().await;
        drop(listener);

        let result = TcpLineConnector::default()
            .connect(&addr, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
