//! Outbound message encoder.

use bytes::Bytes;
use tracing::trace;

use crate::error::{Error, Result};
use crate::extensions::ExtensionChain;
use crate::message::Message;
use crate::protocol::frame::Frame;

/// Encodes messages into server frames.
///
/// Every message becomes exactly one frame with FIN set. Server frames are
/// never masked.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buffer: Vec<u8>,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `message` into wire bytes.
    ///
    /// Data messages pass through the extension chain in negotiation order.
    /// Control messages are framed as-is.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` for a Close carrying a code that may not be sent
    /// - `Error::ControlFrameTooLarge` for a ping or pong payload over 125 bytes
    /// - any error raised by an extension's encode step
    pub fn encode(&mut self, message: Message, chain: &mut ExtensionChain) -> Result<Bytes> {
        let frame = match message {
            Message::Text(text) => {
                let mut frame = Frame::text(text.into_bytes());
                chain.encode(&mut frame)?;
                frame
            }
            Message::Binary(data) => {
                let mut frame = Frame::binary(data);
                chain.encode(&mut frame)?;
                frame
            }
            Message::Ping(data) => Frame::ping(data),
            Message::Pong(data) => Frame::pong(data),
            Message::Close(close) => {
                if let Some(close) = &close {
                    if !close.code.is_valid() || close.code.is_reserved() {
                        return Err(Error::InvalidCloseCode(close.code.as_u16()));
                    }
                }
                Frame::close(close.as_ref())
            }
        };
        frame.validate()?;

        trace!(
            opcode = %frame.opcode,
            len = frame.payload().len(),
            rsv1 = frame.rsv1,
            "Frame encoded"
        );

        self.buffer.clear();
        frame.write(&mut self.buffer, None);
        Ok(Bytes::copy_from_slice(&self.buffer))
    }
}
