//! Error types for the WebSocket session engine.
//!
//! Every failure that happens after the handshake maps onto an RFC 6455
//! close code through [`Error::close_code`]; failures without a code are
//! handshake, state or transport problems.

use thiserror::Error;

use crate::message::CloseCode;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The client asked for a protocol version other than 13 (or none).
    #[error("Unsupported WebSocket version: {}", .0.as_deref().unwrap_or("(none)"))]
    UnsupportedVersion(Option<String>),

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// A response header value would break the HTTP framing.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked client frame (security violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Reserved bits set without a negotiated extension claiming them.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Invalid close code, received or about to be sent.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// An extension failed to transform a payload.
    #[error("Extension error: {0}")]
    Extension(String),

    /// Invalid extension configuration or negotiation.
    #[error("Invalid extension: {0}")]
    InvalidExtension(String),

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Operation requires a completed handshake.
    #[error("Handshake not completed")]
    HandshakeNotCompleted,

    /// Session has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Close code to send to the peer when this error ends a session.
    ///
    /// Returns `None` for failures that are not protocol-level: handshake,
    /// session state and transport errors.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::ProtocolViolation(_)
            | Error::ReservedOpcode(_)
            | Error::FragmentedControlFrame
            | Error::ControlFrameTooLarge(_)
            | Error::UnmaskedClientFrame
            | Error::ReservedBitsSet
            | Error::InvalidCloseCode(_) => Some(CloseCode::ProtocolError),
            Error::InvalidUtf8 | Error::Extension(_) => Some(CloseCode::InvalidPayload),
            Error::FrameTooLarge { .. } | Error::MessageTooLarge { .. } => {
                Some(CloseCode::MessageTooBig)
            }
            Error::UnsupportedVersion(_)
            | Error::InvalidHandshake(_)
            | Error::InvalidHeaderValue { .. }
            | Error::InvalidExtension(_)
            | Error::IncompleteFrame { .. }
            | Error::HandshakeNotCompleted
            | Error::ConnectionClosed
            | Error::Io(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Self {
        Error::InvalidUtf8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FrameTooLarge {
            size: 20_000_000,
            max: 16_000_000,
        };
        assert_eq!(
            err.to_string(),
            "Frame too large: 20000000 bytes (max: 16000000)"
        );
    }

    #[test]
    fn test_unsupported_version_display() {
        assert_eq!(
            Error::UnsupportedVersion(Some("8".into())).to_string(),
            "Unsupported WebSocket version: 8"
        );
        assert_eq!(
            Error::UnsupportedVersion(None).to_string(),
            "Unsupported WebSocket version: (none)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Io(_)));
        assert_eq!(ws_err.close_code(), None);
    }

    #[test]
    fn test_close_code_mapping() {
        assert_eq!(
            Error::ReservedBitsSet.close_code(),
            Some(CloseCode::ProtocolError)
        );
        assert_eq!(
            Error::UnmaskedClientFrame.close_code(),
            Some(CloseCode::ProtocolError)
        );
        assert_eq!(
            Error::InvalidUtf8.close_code(),
            Some(CloseCode::InvalidPayload)
        );
        assert_eq!(
            Error::MessageTooLarge { size: 2, max: 1 }.close_code(),
            Some(CloseCode::MessageTooBig)
        );
        assert_eq!(
            Error::FrameTooLarge { size: 2, max: 1 }.close_code(),
            Some(CloseCode::MessageTooBig)
        );
        assert_eq!(Error::InvalidHandshake("x".into()).close_code(), None);
        assert_eq!(Error::ConnectionClosed.close_code(), None);
    }

    #[test]
    fn test_error_clone() {
        let err = Error::InvalidUtf8;
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }
}
