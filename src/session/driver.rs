//! Tokio adapter: runs one [`Session`] over an async byte stream.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::protocol::handshake::HttpRequest;
use crate::session::{Handler, Liveness, Session, Transport};

/// Work queued for the connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Data(Bytes),
    Shutdown,
}

/// [`Transport`] that queues writes for an async writer task.
#[derive(Debug, Clone)]
pub struct QueuedTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl QueuedTransport {
    /// Create a transport and the receiving end its writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for QueuedTransport {
    fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.tx
            .send(Outbound::Data(data))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection writer is gone"))
    }

    fn close(&mut self) {
        let _ = self.tx.send(Outbound::Shutdown);
    }
}

/// Drive a session over `stream` until the connection closes.
///
/// Performs the handshake for `request`, then pumps inbound bytes into the
/// session, writes everything it queues and runs a liveness check every
/// keep-alive interval. A read of zero bytes, a read or write failure, or
/// a stale liveness result aborts the session.
///
/// # Errors
///
/// Returns the handshake error when the upgrade was rejected (the rejection
/// response has been written by then).
pub async fn run_session<S, R, H>(
    stream: S,
    request: &R,
    config: Arc<ServerConfig>,
    mut handler: H,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: HttpRequest,
    H: Handler<QueuedTransport>,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (transport, mut rx) = QueuedTransport::channel();
    let mut session = Session::new(transport, Arc::clone(&config));
    let handshake = session.handshake(request);
    // The stream is always ready for I/O once upgraded.
    if handshake.is_ok() {
        session.set_selected(true);
    }

    let mut buf = vec![0u8; config.read_buffer_size.max(1)];
    let mut ticker = tokio::time::interval(config.keep_alive.max(Duration::from_millis(1)));
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            outbound = rx.recv() => match outbound {
                Some(Outbound::Data(data)) => {
                    if let Err(err) = writer.write_all(&data).await {
                        debug!(error = %err, "Write failed");
                        session.abort();
                    }
                }
                Some(Outbound::Shutdown) | None => {
                    if let Err(err) = writer.shutdown().await {
                        debug!(error = %err, "Shutdown failed");
                    }
                    break;
                }
            },

            read = reader.read(&mut buf), if !session.is_closed() => match read {
                Ok(0) => {
                    debug!("Peer closed the connection");
                    session.abort();
                }
                Ok(n) => session.process_read(&buf[..n], &mut handler),
                Err(err) => {
                    debug!(error = %err, "Read failed");
                    session.abort();
                }
            },

            _ = ticker.tick(), if !session.is_closed() => {
                if session.check_status(Instant::now()) == Liveness::Stale {
                    session.abort();
                }
            }
        }
    }

    handshake
}
