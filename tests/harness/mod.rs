//! Test harness utilities for driving sessions without a socket.
//!
//! Provides a recording transport, a recording handler, an extension that
//! counts its releases, and helpers to build masked client frames.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use wsession::config::Limits;
use wsession::extensions::{Extension, ExtensionFactory, ExtensionParam};
use wsession::protocol::{Frame, OpCode};
use wsession::{
    CloseCode, CloseFrame, Error, Handler, Message, Request, Result, ServerConfig, Session,
    Transport,
};

pub const CLIENT_MASK: [u8; 4] = [0xa1, 0xb2, 0xc3, 0xd4];

pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

// =============================================================================
// Transport
// =============================================================================

#[derive(Debug, Default)]
struct Wire {
    sent: Vec<Bytes>,
    closes: usize,
    fail_sends: bool,
}

/// Transport recording everything the session writes.
///
/// Clones share the same record, so a test keeps one handle while the
/// session owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    wire: Arc<Mutex<Wire>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.wire.lock().unwrap().sent.clone()
    }

    pub fn clear(&self) {
        self.wire.lock().unwrap().sent.clear();
    }

    pub fn closes(&self) -> usize {
        self.wire.lock().unwrap().closes
    }

    /// Make every following send fail with `BrokenPipe`.
    pub fn fail_sends(&self, fail: bool) {
        self.wire.lock().unwrap().fail_sends = fail;
    }

    /// First sent buffer as text; the handshake response.
    pub fn response_text(&self) -> String {
        let sent = self.sent();
        String::from_utf8(sent.first().expect("nothing sent").to_vec()).unwrap()
    }

    /// Frames written after the handshake response.
    pub fn frames(&self) -> Vec<Frame> {
        self.sent()
            .iter()
            .filter(|data| !data.starts_with(b"HTTP/"))
            .flat_map(|data| parse_frames(data))
            .collect()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, data: Bytes) -> io::Result<()> {
        let mut wire = self.wire.lock().unwrap();
        if wire.fail_sends {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock send failure"));
        }
        wire.sent.push(data);
        Ok(())
    }

    fn close(&mut self) {
        self.wire.lock().unwrap().closes += 1;
    }
}

// =============================================================================
// Handler
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
    Error(Error),
}

/// Handler recording every callback, optionally echoing data messages.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<Event>,
    pub echo: bool,
}

impl Recorder {
    pub fn echoing() -> Self {
        Self {
            events: Vec::new(),
            echo: true,
        }
    }
}

impl<T: Transport> Handler<T> for Recorder {
    fn on_text(&mut self, session: &mut Session<T>, text: String) -> Result<()> {
        self.events.push(Event::Text(text.clone()));
        if self.echo {
            session.send(Message::Text(text))?;
        }
        Ok(())
    }

    fn on_binary(&mut self, session: &mut Session<T>, data: Vec<u8>) -> Result<()> {
        self.events.push(Event::Binary(data.clone()));
        if self.echo {
            session.send(Message::Binary(data))?;
        }
        Ok(())
    }

    fn on_ping(&mut self, session: &mut Session<T>, data: Vec<u8>) -> Result<()> {
        self.events.push(Event::Ping(data.clone()));
        session.send(Message::Pong(data))
    }

    fn on_pong(&mut self, _session: &mut Session<T>, data: Vec<u8>) -> Result<()> {
        self.events.push(Event::Pong(data));
        Ok(())
    }

    fn on_close(&mut self, session: &mut Session<T>, frame: Option<CloseFrame>) -> Result<()> {
        let code = frame.as_ref().map_or(CloseCode::Normal, |f| f.code);
        self.events.push(Event::Close(frame));
        session.close(code);
        Ok(())
    }

    fn on_error(&mut self, _session: &mut Session<T>, error: &Error) {
        self.events.push(Event::Error(error.clone()));
    }
}

// =============================================================================
// Extensions
// =============================================================================

/// Pass-through extension that counts how often instances are released.
pub struct CountingFactory {
    name: &'static str,
    releases: Arc<AtomicUsize>,
    fail_release: bool,
}

impl CountingFactory {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            releases: Arc::new(AtomicUsize::new(0)),
            fail_release: false,
        }
    }

    /// Instances report an error when released (after counting).
    pub fn failing(name: &'static str) -> Self {
        Self {
            fail_release: true,
            ..Self::new(name)
        }
    }

    pub fn releases(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }
}

impl ExtensionFactory for CountingFactory {
    fn name(&self) -> &str {
        self.name
    }

    fn negotiate(&self, _params: &[ExtensionParam], _limits: &Limits) -> Option<Box<dyn Extension>> {
        Some(Box::new(CountingExtension {
            name: self.name,
            releases: Arc::clone(&self.releases),
            fail_release: self.fail_release,
        }))
    }
}

struct CountingExtension {
    name: &'static str,
    releases: Arc<AtomicUsize>,
    fail_release: bool,
}

impl Extension for CountingExtension {
    fn name(&self) -> &str {
        self.name
    }

    fn encode(&mut self, _frame: &mut Frame) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, _frame: &mut Frame) -> Result<()> {
        Ok(())
    }

    fn append_response_header(&self, buf: &mut String) {
        buf.push_str(self.name);
    }

    fn close(&mut self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(Error::Extension(format!("{} release failed", self.name)));
        }
        Ok(())
    }
}

// =============================================================================
// Frames and requests
// =============================================================================

/// Encode a frame the way a client does, masked.
pub fn client_frame(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::new();
    frame.write(&mut buf, Some(CLIENT_MASK));
    buf
}

pub fn client_text(text: &str) -> Vec<u8> {
    client_frame(&Frame::text(text))
}

pub fn client_fragment(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    client_frame(&Frame::new(fin, opcode, payload.to_vec()))
}

pub fn client_close(code: CloseCode, reason: &str) -> Vec<u8> {
    client_frame(&Frame::close(Some(&CloseFrame::new(code, reason))))
}

/// Split a byte stream of server frames.
pub fn parse_frames(mut data: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    while !data.is_empty() {
        let (frame, consumed) = Frame::parse(data).unwrap();
        frames.push(frame);
        data = &data[consumed..];
    }
    frames
}

/// Close code carried by a Close frame.
pub fn close_code(frame: &Frame) -> Option<u16> {
    assert_eq!(frame.opcode, OpCode::Close);
    let payload = frame.payload();
    (payload.len() >= 2).then(|| u16::from_be_bytes([payload[0], payload[1]]))
}

/// A valid upgrade request for [`SAMPLE_KEY`].
pub fn upgrade_request() -> Request {
    Request::new("GET")
        .with_header("Host", "server.example.com")
        .with_header("Upgrade", "websocket")
        .with_header("Connection", "Upgrade")
        .with_header("Sec-WebSocket-Key", SAMPLE_KEY)
        .with_header("Sec-WebSocket-Version", "13")
}

/// Session after a successful handshake, plus a handle on its transport.
pub fn open_session(config: ServerConfig) -> (Session<MockTransport>, MockTransport) {
    open_session_with(config, &upgrade_request())
}

pub fn open_session_with(
    config: ServerConfig,
    request: &Request,
) -> (Session<MockTransport>, MockTransport) {
    let transport = MockTransport::new();
    let mut session = Session::new(transport.clone(), Arc::new(config));
    session.handshake(request).unwrap();
    (session, transport)
}
