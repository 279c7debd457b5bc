//! WebSocket protocol core implementation (RFC 6455).

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod reader;
pub mod writer;

pub use frame::Frame;
pub use handshake::{
    HandshakeRequest, HandshakeResponse, HttpRequest, Negotiation, Request, Status, WS_GUID,
    compute_accept_key, negotiate,
};
pub use mask::apply_mask;
pub use opcode::OpCode;
pub use reader::MessageReader;
pub use writer::MessageWriter;
