//! Resumable inbound message decoder.
//!
//! Bytes arrive in arbitrary chunks through [`MessageReader::feed`]; each
//! call to [`MessageReader::read`] yields at most one complete message.
//! Partially received frames and partially assembled messages are kept
//! between calls.

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::extensions::{ExtensionChain, RsvBits};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::OpCode;
use crate::protocol::frame::{Frame, FrameHeader, MAX_CONTROL_FRAME_PAYLOAD, parse_header};
use crate::protocol::mask::apply_mask;

#[derive(Debug, Clone, Copy)]
enum ReadState {
    /// Waiting for a complete frame header.
    Header,
    /// Header accepted and consumed, waiting for its payload.
    Payload(FrameHeader),
}

/// Decodes client frames into messages.
#[derive(Debug)]
pub struct MessageReader {
    buffer: BytesMut,
    state: ReadState,
    limits: Limits,
    accept_unmasked: bool,
    /// Data message being reassembled, payload still extension-encoded.
    partial: Option<Frame>,
}

impl MessageReader {
    /// Create a reader enforcing `limits`.
    ///
    /// Unmasked frames are a protocol error unless `accept_unmasked` is set.
    pub fn new(limits: Limits, accept_unmasked: bool) -> Self {
        Self {
            buffer: BytesMut::new(),
            state: ReadState::Header,
            limits,
            accept_unmasked,
            partial: None,
        }
    }

    /// Append raw bytes received from the peer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of received bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true while a fragmented data message is in progress.
    pub fn is_assembling(&self) -> bool {
        self.partial.is_some()
    }

    /// Decode the next complete message from the buffered bytes.
    ///
    /// Returns `Ok(None)` when more input is needed. Control frames that
    /// arrive between fragments are returned on their own and leave the
    /// message in progress untouched.
    ///
    /// # Errors
    ///
    /// Any protocol, size, UTF-8 or extension error. The reader must not be
    /// used after an error.
    pub fn read(&mut self, chain: &mut ExtensionChain) -> Result<Option<Message>> {
        loop {
            let header = match self.state {
                ReadState::Header => {
                    let header = match parse_header(&self.buffer) {
                        Ok(header) => header,
                        Err(Error::IncompleteFrame { .. }) => return Ok(None),
                        Err(err) => return Err(err),
                    };
                    self.check_header(&header, chain.rsv_bits())?;
                    self.buffer.advance(header.header_len);
                    self.state = ReadState::Payload(header);
                    header
                }
                ReadState::Payload(header) => header,
            };

            if self.buffer.len() < header.payload_len {
                return Ok(None);
            }

            let mut payload = self.buffer.split_to(header.payload_len).to_vec();
            self.state = ReadState::Header;
            if let Some(mask) = header.mask {
                apply_mask(&mut payload, mask);
            }

            trace!(
                opcode = %header.opcode,
                fin = header.fin,
                len = header.payload_len,
                "Frame received"
            );

            if let Some(message) = self.on_frame(&header, payload, chain)? {
                return Ok(Some(message));
            }
        }
    }

    /// Header checks, run before any payload byte is buffered for the frame.
    fn check_header(&self, header: &FrameHeader, claimed: RsvBits) -> Result<()> {
        if header.mask.is_none() && !self.accept_unmasked {
            return Err(Error::UnmaskedClientFrame);
        }

        if header.has_rsv() {
            let unclaimed = (header.rsv1 && !claimed.rsv1)
                || (header.rsv2 && !claimed.rsv2)
                || (header.rsv3 && !claimed.rsv3);
            if unclaimed || header.opcode.is_control() || header.opcode == OpCode::Continuation {
                return Err(Error::ReservedBitsSet);
            }
        }

        if header.opcode.is_control() {
            if !header.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if header.payload_len > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(header.payload_len));
            }
        } else if header.opcode == OpCode::Continuation {
            if self.partial.is_none() {
                return Err(Error::ProtocolViolation(
                    "Unexpected continuation frame".into(),
                ));
            }
        } else if self.partial.is_some() {
            return Err(Error::ProtocolViolation(
                "Expected continuation frame".into(),
            ));
        }

        self.limits.check_frame_size(header.payload_len)?;

        if header.opcode.is_data() {
            let buffered = self.partial.as_ref().map_or(0, |f| f.payload().len());
            self.limits
                .check_message_size(buffered.saturating_add(header.payload_len))?;
        }
        Ok(())
    }

    fn on_frame(
        &mut self,
        header: &FrameHeader,
        payload: Vec<u8>,
        chain: &mut ExtensionChain,
    ) -> Result<Option<Message>> {
        match header.opcode {
            OpCode::Ping => Ok(Some(Message::Ping(payload))),
            OpCode::Pong => Ok(Some(Message::Pong(payload))),
            OpCode::Close => Ok(Some(Message::Close(parse_close_payload(&payload)?))),
            OpCode::Text | OpCode::Binary => {
                let mut frame = Frame::new(header.fin, header.opcode, payload);
                frame.rsv1 = header.rsv1;
                frame.rsv2 = header.rsv2;
                frame.rsv3 = header.rsv3;
                if header.fin {
                    self.complete(frame, chain).map(Some)
                } else {
                    self.partial = Some(frame);
                    Ok(None)
                }
            }
            OpCode::Continuation => {
                let Some(partial) = self.partial.as_mut() else {
                    return Err(Error::ProtocolViolation(
                        "Unexpected continuation frame".into(),
                    ));
                };
                partial.extend_payload(&payload);
                if !header.fin {
                    return Ok(None);
                }
                match self.partial.take() {
                    Some(frame) => self.complete(frame, chain).map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    fn complete(&self, mut frame: Frame, chain: &mut ExtensionChain) -> Result<Message> {
        frame.fin = true;
        chain.decode(&mut frame)?;

        if frame.rsv1 || frame.rsv2 || frame.rsv3 {
            return Err(Error::ReservedBitsSet);
        }
        self.limits.check_message_size(frame.payload().len())?;

        match frame.opcode {
            OpCode::Text => Ok(Message::Text(String::from_utf8(frame.into_payload())?)),
            _ => Ok(Message::Binary(frame.into_payload())),
        }
    }
}

/// Parse a Close frame body: empty, or a 2-byte code plus UTF-8 reason.
fn parse_close_payload(payload: &[u8]) -> Result<Option<CloseFrame>> {
    match payload {
        [] => Ok(None),
        [_] => Err(Error::ProtocolViolation(
            "Close frame payload of 1 byte".into(),
        )),
        [hi, lo, reason @ ..] => {
            let code = CloseCode::from_u16(u16::from_be_bytes([*hi, *lo]));
            if !code.is_valid() {
                return Err(Error::InvalidCloseCode(code.as_u16()));
            }
            let reason = std::str::from_utf8(reason)?;
            Ok(Some(CloseFrame {
                code,
                reason: reason.to_string(),
            }))
        }
    }
}
