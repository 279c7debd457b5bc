//! WebSocket opening handshake (RFC 6455 Section 4.2).
//!
//! The HTTP request has already been parsed by the surrounding server; this
//! module only needs method and header lookup from it, through
//! [`HttpRequest`]. [`negotiate`] turns such a request into either an
//! accepted upgrade (a `101` response plus the negotiated extension chain)
//! or a rejection response.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::extensions::{ExtensionChain, negotiate_extensions};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this engine speaks.
pub const WS_VERSION: &str = "13";

/// A parsed HTTP request, as handed over by the surrounding server.
pub trait HttpRequest {
    /// Request method, e.g. `GET`.
    fn method(&self) -> &str;

    /// First value of the named header. Lookup is case-insensitive.
    fn header(&self, name: &str) -> Option<&str>;
}

/// Owned [`HttpRequest`] for servers that do not bring their own type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    method: String,
    headers: Vec<(String, String)>,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header. Earlier headers win on lookup.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl HttpRequest for Request {
    fn method(&self) -> &str {
        &self.method
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsession::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

fn has_token(value: Option<&str>, token: &str) -> bool {
    value.is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
}

/// Validated WebSocket upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// The Sec-WebSocket-Key header value.
    pub key: String,
    /// Requested sub-protocols, in client preference order.
    pub protocols: Vec<String>,
    /// Raw Sec-WebSocket-Extensions header value.
    pub extensions: Option<String>,
}

impl HandshakeRequest {
    /// Validate an upgrade request.
    ///
    /// Checks run in a fixed order and the first failure wins: version,
    /// method, key, upgrade headers.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedVersion`] if Sec-WebSocket-Version is missing or not `13`
    /// - [`Error::InvalidHandshake`] if the method is not `GET`, the key is
    ///   missing, or the Upgrade/Connection headers do not ask for a websocket upgrade
    pub fn from_http(request: &impl HttpRequest) -> Result<Self> {
        let version = request.header("Sec-WebSocket-Version").map(str::trim);
        if version != Some(WS_VERSION) {
            return Err(Error::UnsupportedVersion(version.map(String::from)));
        }

        if request.method() != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "Expected GET method, got {}",
                request.method()
            )));
        }

        let key = request
            .header("Sec-WebSocket-Key")
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Key header".into()))?;

        if !has_token(request.header("Upgrade"), "websocket") {
            return Err(Error::InvalidHandshake(
                "Missing or invalid Upgrade header".into(),
            ));
        }
        if !has_token(request.header("Connection"), "upgrade") {
            return Err(Error::InvalidHandshake(
                "Missing or invalid Connection header".into(),
            ));
        }

        let protocols = request
            .header("Sec-WebSocket-Protocol")
            .map(|p| {
                p.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            key: key.to_string(),
            protocols,
            extensions: request.header("Sec-WebSocket-Extensions").map(String::from),
        })
    }

    /// First client-listed sub-protocol the server supports.
    pub fn select_protocol(&self, config: &ServerConfig) -> Option<&str> {
        self.protocols
            .iter()
            .map(String::as_str)
            .find(|p| config.is_supported_protocol(p))
    }
}

/// Response status for a handshake attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 101, the connection is upgraded.
    SwitchingProtocols,
    /// 400, the request is not a valid upgrade.
    BadRequest,
    /// 426, the client must retry with a supported version.
    UpgradeRequired,
}

impl Status {
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Status::SwitchingProtocols => 101,
            Status::BadRequest => 400,
            Status::UpgradeRequired => 426,
        }
    }

    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Status::SwitchingProtocols => "Switching Protocols",
            Status::BadRequest => "Bad Request",
            Status::UpgradeRequired => "Upgrade Required",
        }
    }
}

/// Validate that a header value does not contain CR or LF characters.
fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// HTTP response to a handshake attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: Status,
    /// Headers in write order.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HandshakeResponse {
    fn new(status: Status) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// `101 Switching Protocols` for the given client key.
    pub fn switching_protocols(key: &str) -> Self {
        Self::new(Status::SwitchingProtocols)
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
            .with_header("Sec-WebSocket-Accept", compute_accept_key(key))
    }

    /// `426 Upgrade Required`, advertising the supported version.
    pub fn upgrade_required() -> Self {
        Self::new(Status::UpgradeRequired).with_header("Sec-WebSocket-Version", WS_VERSION)
    }

    /// `400 Bad Request` carrying `message` as a plain-text body.
    pub fn bad_request(message: impl Into<String>) -> Self {
        let mut response = Self::new(Status::BadRequest);
        response.body = message.into();
        response
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_header("Connection", "close")
    }

    /// Value of the named response header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check every header value for CR/LF.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeaderValue` for the first offending header.
    pub fn validate(&self) -> Result<()> {
        self.headers
            .iter()
            .try_for_each(|(name, value)| validate_header_value(name, value))
    }

    /// Write the HTTP response to a buffer.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeaderValue` if a header value contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.validate()?;

        buf.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.code(),
                self.status.reason()
            )
            .as_bytes(),
        );
        for (name, value) in &self.headers {
            buf.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        if self.status != Status::SwitchingProtocols {
            buf.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(self.body.as_bytes());
        Ok(())
    }

    /// Serialize into a single buffer ready for the transport.
    ///
    /// # Errors
    ///
    /// Same as [`HandshakeResponse::write`].
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(256);
        self.write(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

/// Outcome of [`negotiate`].
#[derive(Debug)]
pub enum Negotiation {
    /// Upgrade accepted.
    Accepted {
        response: HandshakeResponse,
        extensions: ExtensionChain,
        protocol: Option<String>,
    },
    /// Upgrade refused; `response` is `426` or `400`.
    Rejected {
        response: HandshakeResponse,
        error: Error,
    },
}

impl Negotiation {
    fn rejected(error: Error) -> Self {
        let response = match &error {
            Error::UnsupportedVersion(_) => HandshakeResponse::upgrade_required(),
            other => HandshakeResponse::bad_request(other.to_string()),
        };
        Negotiation::Rejected { response, error }
    }
}

/// Run the server side of the opening handshake.
///
/// On success the response carries, in order, Upgrade, Connection,
/// Sec-WebSocket-Accept, then Sec-WebSocket-Extensions and
/// Sec-WebSocket-Protocol when something was negotiated.
pub fn negotiate(request: &impl HttpRequest, config: &ServerConfig) -> Negotiation {
    let handshake = match HandshakeRequest::from_http(request) {
        Ok(handshake) => handshake,
        Err(error) => return Negotiation::rejected(error),
    };

    let (mut extensions, extensions_header) = negotiate_extensions(
        handshake.extensions.as_deref(),
        &config.extensions,
        &config.limits,
    );
    let protocol = handshake.select_protocol(config).map(String::from);

    let mut response = HandshakeResponse::switching_protocols(&handshake.key);
    if let Some(value) = extensions_header {
        response = response.with_header("Sec-WebSocket-Extensions", value);
    }
    if let Some(protocol) = &protocol {
        response = response.with_header("Sec-WebSocket-Protocol", protocol.clone());
    }

    if let Err(error) = response.validate() {
        if let Err(err) = extensions.close_all() {
            debug!(error = %err, "Failed to release extensions of a rejected handshake");
        }
        return Negotiation::rejected(error);
    }

    Negotiation::Accepted {
        response,
        extensions,
        protocol,
    }
}
