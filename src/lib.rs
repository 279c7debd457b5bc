//! # wsession - RFC 6455 WebSocket session engine
//!
//! `wsession` turns an already accepted HTTP connection into a WebSocket
//! session. The surrounding server owns sockets and HTTP parsing; this crate
//! owns everything after the upgrade request arrives.
//!
//! ## Features
//!
//! - **Handshake validation** with `426`/`400` rejection responses
//! - **Sub-protocol and extension negotiation**
//! - **Resumable frame reader** with per-frame and per-message limits
//! - **permessage-deflate** (RFC 7692), feature `compression`
//! - **Close sequence and liveness probing** in the [`Session`] orchestrator
//! - **Tokio driver**, feature `async-tokio`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wsession::{Handler, Request, ServerConfig, Session};
//!
//! let config = Arc::new(ServerConfig::new().with_protocol("chat"));
//! let mut session = Session::new(transport, config);
//! session.handshake(&request)?;
//!
//! // for every chunk read from the socket
//! session.process_read(&bytes, &mut handler);
//! ```

pub mod config;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;
pub mod session;

pub use config::{Limits, ServerConfig};
pub use error::{Error, Result};
pub use extensions::{Extension, ExtensionChain, ExtensionFactory};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{
    HandshakeRequest, HandshakeResponse, HttpRequest, OpCode, Request, WS_GUID,
    compute_accept_key,
};
pub use session::{Handler, Liveness, Session, SessionState, Transport};

#[cfg(feature = "async-tokio")]
pub use session::{QueuedTransport, run_session};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_public_types_are_send() {
        assert_send::<Error>();
        assert_send::<ServerConfig>();
        assert_send::<Limits>();
        assert_send::<Message>();
        assert_send::<CloseCode>();
        assert_send::<CloseFrame>();
        assert_send::<SessionState>();
        assert_send::<ExtensionChain>();
        assert_send::<protocol::MessageReader>();
    }

    #[test]
    fn test_public_types_are_sync() {
        assert_sync::<Error>();
        assert_sync::<ServerConfig>();
        assert_sync::<Limits>();
        assert_sync::<Message>();
        assert_sync::<CloseCode>();
        assert_sync::<CloseFrame>();
        assert_sync::<SessionState>();
    }
}
