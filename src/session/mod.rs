//! Per-connection WebSocket session.
//!
//! A [`Session`] sits on top of an already accepted connection. The
//! surrounding server hands it the parsed upgrade request, then every chunk
//! of bytes it reads; the session answers through its [`Transport`] and
//! routes decoded messages to a [`Handler`].
//!
//! ```rust,ignore
//! let mut session = Session::new(transport, config);
//! session.handshake(&request)?;
//! session.process_read(&bytes, &mut handler);
//! if session.check_status(Instant::now()) == Liveness::Stale {
//!     session.abort();
//! }
//! ```

pub mod state;
pub mod transport;

#[cfg(feature = "async-tokio")]
pub mod driver;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::extensions::ExtensionChain;
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::handshake::{HttpRequest, Negotiation, negotiate};
use crate::protocol::{MessageReader, MessageWriter};

#[cfg(feature = "async-tokio")]
pub use driver::{Outbound, QueuedTransport, run_session};
pub use state::SessionState;
pub use transport::Transport;

/// Result of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Keep the session.
    Active,
    /// The connection is gone; the owner should reap the session.
    Stale,
}

/// Application callbacks, one per message type.
///
/// Handlers run on the session's read path and may send through the
/// session they are given. Returning an error hands it to the session's
/// failure handling: errors with a close code close the session with that
/// code, anything else goes to [`Handler::on_error`] and aborts the
/// connection.
pub trait Handler<T: Transport> {
    fn on_text(&mut self, session: &mut Session<T>, text: String) -> Result<()>;

    fn on_binary(&mut self, session: &mut Session<T>, data: Vec<u8>) -> Result<()>;

    /// Answers with a Pong carrying the same payload.
    fn on_ping(&mut self, session: &mut Session<T>, data: Vec<u8>) -> Result<()> {
        session.send(Message::Pong(data))
    }

    fn on_pong(&mut self, _session: &mut Session<T>, _data: Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Completes the close handshake, echoing the peer's code (1000 when the
    /// peer sent none).
    fn on_close(&mut self, session: &mut Session<T>, frame: Option<CloseFrame>) -> Result<()> {
        let code = frame.map_or(CloseCode::Normal, |f| f.code);
        session.close(code);
        Ok(())
    }

    /// Receives failures that carry no close code, right before the
    /// connection is dropped.
    fn on_error(&mut self, _session: &mut Session<T>, _error: &Error) {}
}

/// Reader and writer, installed together once the handshake succeeds.
#[derive(Debug)]
struct Codec {
    reader: MessageReader,
    writer: MessageWriter,
}

/// One WebSocket connection, from upgrade request to teardown.
///
/// Not internally synchronized: the owner drives one session from one task
/// at a time.
pub struct Session<T> {
    config: Arc<ServerConfig>,
    transport: T,
    state: SessionState,
    extensions: ExtensionChain,
    codec: Option<Codec>,
    protocol: Option<String>,
    last_activity: Instant,
    probe_sent: bool,
    selected: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            transport,
            state: SessionState::PreHandshake,
            extensions: ExtensionChain::new(),
            codec: None,
            protocol: None,
            last_activity: Instant::now(),
            probe_sent: false,
            selected: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Negotiated sub-protocol, if any.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Negotiated extension chain. Empty before the handshake and after close.
    #[must_use]
    pub fn extensions(&self) -> &ExtensionChain {
        &self.extensions
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Whether a liveness ping went out since the last inbound data.
    #[must_use]
    pub fn probe_sent(&self) -> bool {
        self.probe_sent
    }

    /// Mark whether the connection was reported ready for I/O in the latest
    /// readiness cycle. Liveness probes are only sent to selected sessions.
    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    /// Run the opening handshake for `request`.
    ///
    /// On success the `101` response is sent, the reader and writer are
    /// installed and the session is `Open`. On failure the `426` or `400`
    /// response is sent best-effort, the connection is closed and the
    /// handshake error is returned.
    ///
    /// # Errors
    ///
    /// - the handshake error, after the rejection response went out
    /// - `Error::Io` if the `101` response cannot be sent
    /// - `Error::InvalidHandshake` if the session already handled a request
    pub fn handshake(&mut self, request: &impl HttpRequest) -> Result<()> {
        if self.state != SessionState::PreHandshake {
            return Err(Error::InvalidHandshake(
                "Handshake already performed".into(),
            ));
        }

        match negotiate(request, &self.config) {
            Negotiation::Accepted {
                response,
                extensions,
                protocol,
            } => {
                let bytes = match response.to_bytes() {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        self.abort();
                        return Err(err);
                    }
                };
                debug!(
                    protocol = ?protocol,
                    extensions = ?extensions.names(),
                    "Handshake accepted"
                );

                self.extensions = extensions;
                self.protocol = protocol;
                self.codec = Some(Codec {
                    reader: MessageReader::new(
                        self.config.limits.clone(),
                        self.config.accept_unmasked_frames,
                    ),
                    writer: MessageWriter::new(),
                });
                self.state = SessionState::Open;
                self.last_activity = Instant::now();

                if let Err(err) = self.transport.send(bytes) {
                    self.abort();
                    return Err(err.into());
                }
                Ok(())
            }
            Negotiation::Rejected { response, error } => {
                debug!(
                    status = response.status.code(),
                    error = %error,
                    "Handshake rejected"
                );
                match response.to_bytes() {
                    Ok(bytes) => {
                        if let Err(err) = self.transport.send(bytes) {
                            warn!(error = %err, "Failed to send handshake rejection");
                        }
                    }
                    Err(err) => warn!(error = %err, "Failed to encode handshake rejection"),
                }
                self.abort();
                Err(error)
            }
        }
    }

    /// Feed bytes read from the connection and dispatch every message they
    /// complete.
    ///
    /// Failures are handled here: errors carrying a close code start the
    /// close sequence with that code, others go to [`Handler::on_error`]
    /// and abort the connection. A no-op once the session is closed or
    /// before the handshake.
    pub fn process_read<H: Handler<T>>(&mut self, data: &[u8], handler: &mut H) {
        if self.state != SessionState::Open {
            return;
        }
        let Some(codec) = self.codec.as_mut() else {
            return;
        };
        codec.reader.feed(data);
        self.last_activity = Instant::now();
        self.probe_sent = false;

        while self.state == SessionState::Open {
            let next = match self.codec.as_mut() {
                Some(codec) => codec.reader.read(&mut self.extensions),
                None => break,
            };
            match next {
                Ok(Some(message)) => {
                    if let Err(err) = self.dispatch(message, handler) {
                        self.handle_error(err, handler);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    self.handle_error(err, handler);
                    break;
                }
            }
        }
    }

    fn dispatch<H: Handler<T>>(&mut self, message: Message, handler: &mut H) -> Result<()> {
        match message {
            Message::Text(text) => handler.on_text(self, text),
            Message::Binary(data) => handler.on_binary(self, data),
            Message::Ping(data) => handler.on_ping(self, data),
            Message::Pong(data) => handler.on_pong(self, data),
            Message::Close(frame) => handler.on_close(self, frame),
        }
    }

    fn handle_error<H: Handler<T>>(&mut self, err: Error, handler: &mut H) {
        error!(error = %err, state = %self.state, "Session failure");
        match err.close_code() {
            Some(code) if self.state == SessionState::Open => self.close(code),
            _ => {
                handler.on_error(self, &err);
                self.abort();
            }
        }
    }

    /// Send a message to the peer.
    ///
    /// # Errors
    ///
    /// - `Error::HandshakeNotCompleted` before the handshake
    /// - `Error::ConnectionClosed` once closing has started
    /// - encoding errors, see [`MessageWriter::encode`]
    /// - `Error::Io` if the transport refuses the bytes
    pub fn send(&mut self, message: Message) -> Result<()> {
        match self.state {
            SessionState::PreHandshake => Err(Error::HandshakeNotCompleted),
            SessionState::Closing | SessionState::Closed => Err(Error::ConnectionClosed),
            SessionState::Open => self.write_message(message),
        }
    }

    fn write_message(&mut self, message: Message) -> Result<()> {
        let codec = self.codec.as_mut().ok_or(Error::HandshakeNotCompleted)?;
        let bytes = codec.writer.encode(message, &mut self.extensions)?;
        self.transport.send(bytes)?;
        Ok(())
    }

    /// Close the session with `code` and no reason.
    pub fn close(&mut self, code: CloseCode) {
        self.close_with_reason(code, "");
    }

    /// Run the close sequence.
    ///
    /// Sends one Close frame (best-effort), releases every negotiated
    /// extension and closes the transport. Before the handshake the
    /// connection is simply closed; after close this does nothing.
    pub fn close_with_reason(&mut self, code: CloseCode, reason: &str) {
        match self.state {
            SessionState::Closing | SessionState::Closed => return,
            SessionState::PreHandshake => {
                self.abort();
                return;
            }
            SessionState::Open => {}
        }

        self.state = SessionState::Closing;
        debug!(code = %code, "Closing session");

        let close = CloseFrame::new(code, reason);
        if let Err(err) = self.write_message(Message::Close(Some(close))) {
            warn!(code = %code, error = %err, "Failed to send close frame");
        }
        self.abort();
    }

    /// Tear the session down without a Close frame.
    ///
    /// Releases the extension chain and closes the transport, once.
    pub fn abort(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.state = SessionState::Closed;

        if let Err(err) = self.extensions.close_all() {
            debug!(error = %err, "Extension release reported failure");
        }
        self.transport.close();
        debug!("Session closed");
    }

    /// Liveness check, meant to be called periodically by the owner.
    ///
    /// Reports `Active` while the session has been idle for less than the
    /// keep-alive interval. Past it, a session selected for I/O gets a Ping
    /// and stays `Active` unless the Ping cannot be sent. Closed sessions
    /// are `Stale`.
    pub fn check_status(&mut self, now: Instant) -> Liveness {
        match self.state {
            SessionState::Closed => return Liveness::Stale,
            SessionState::Open => {}
            SessionState::PreHandshake | SessionState::Closing => return Liveness::Active,
        }

        let idle = now.saturating_duration_since(self.last_activity);
        if idle < self.config.keep_alive || !self.selected {
            return Liveness::Active;
        }

        match self.write_message(Message::Ping(Vec::new())) {
            Ok(()) => {
                trace!(idle_ms = idle.as_millis() as u64, "Liveness probe sent");
                self.probe_sent = true;
                Liveness::Active
            }
            Err(err) => {
                debug!(error = %err, "Liveness probe failed");
                Liveness::Stale
            }
        }
    }
}

impl<T> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("protocol", &self.protocol)
            .field("extensions", &self.extensions)
            .field("probe_sent", &self.probe_sent)
            .field("selected", &self.selected)
            .finish()
    }
}
