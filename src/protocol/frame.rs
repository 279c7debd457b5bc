//! WebSocket frame parsing and serialization (RFC 6455).

use crate::error::{Error, Result};
use crate::message::CloseFrame;
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Decoded frame header, everything before the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) fin: bool,
    pub(crate) rsv1: bool,
    pub(crate) rsv2: bool,
    pub(crate) rsv3: bool,
    pub(crate) opcode: OpCode,
    pub(crate) mask: Option<[u8; 4]>,
    pub(crate) payload_len: usize,
    pub(crate) header_len: usize,
}

impl FrameHeader {
    pub(crate) const fn has_rsv(&self) -> bool {
        self.rsv1 || self.rsv2 || self.rsv3
    }
}

/// Parse frame header from buffer.
///
/// A 64-bit length that does not fit in `usize` is saturated to
/// `usize::MAX`, which the caller's size limits then reject.
///
/// # Errors
///
/// - `Error::IncompleteFrame` if not enough data is available
/// - `Error::ReservedOpcode` if a reserved opcode is used
/// - `Error::ProtocolViolation` if the most significant bit of a 64-bit length is set
#[inline]
pub(crate) fn parse_header(buf: &[u8]) -> Result<FrameHeader> {
    if buf.len() < 2 {
        return Err(Error::IncompleteFrame {
            needed: 2 - buf.len(),
        });
    }

    let byte0 = buf[0];
    let byte1 = buf[1];

    let fin = (byte0 & 0x80) != 0;
    let rsv1 = (byte0 & 0x40) != 0;
    let rsv2 = (byte0 & 0x20) != 0;
    let rsv3 = (byte0 & 0x10) != 0;
    let opcode = OpCode::from_u8(byte0 & 0x0F)?;

    let masked = (byte1 & 0x80) != 0;
    let payload_len_initial = byte1 & 0x7F;

    let (payload_len, header_size) = match payload_len_initial {
        126 => {
            if buf.len() < 4 {
                return Err(Error::IncompleteFrame {
                    needed: 4 - buf.len(),
                });
            }
            let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
            (len, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Err(Error::IncompleteFrame {
                    needed: 10 - buf.len(),
                });
            }
            let len_u64 = u64::from_be_bytes([
                buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
            ]);
            if len_u64 & (1 << 63) != 0 {
                return Err(Error::ProtocolViolation(
                    "most significant bit of 64-bit payload length is set".into(),
                ));
            }
            (usize::try_from(len_u64).unwrap_or(usize::MAX), 10)
        }
        short => (short as usize, 2),
    };

    let total_header_size = if masked { header_size + 4 } else { header_size };

    if buf.len() < total_header_size {
        return Err(Error::IncompleteFrame {
            needed: total_header_size - buf.len(),
        });
    }

    let mask = if masked {
        Some([
            buf[header_size],
            buf[header_size + 1],
            buf[header_size + 2],
            buf[header_size + 3],
        ])
    } else {
        None
    };

    Ok(FrameHeader {
        fin,
        rsv1,
        rsv2,
        rsv3,
        opcode,
        mask,
        payload_len,
        header_len: total_header_size,
    })
}

/// A WebSocket frame as defined in RFC 6455.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode |M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)   |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                         Masking key (if present)              |
/// +---------------------------------------------------------------+
/// |                     Payload data                              |
/// +---------------------------------------------------------------+
/// ```
///
/// Extensions see messages as frames: the reader hands them one frame
/// holding the whole reassembled payload, the writer one frame per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True if this is the last fragment of a message.
    pub fin: bool,
    /// Reserved bit 1. Must be 0 unless an extension claims it.
    pub rsv1: bool,
    /// Reserved bit 2. Must be 0 unless an extension claims it.
    pub rsv2: bool,
    /// Reserved bit 3. Must be 0 unless an extension claims it.
    pub rsv3: bool,
    /// Frame opcode defining the interpretation of payload data.
    pub opcode: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame with all reserved bits cleared.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload,
        }
    }

    /// Create a text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a close frame, empty when no status is given.
    #[must_use]
    pub fn close(close: Option<&CloseFrame>) -> Self {
        let payload = close.map(CloseFrame::to_payload).unwrap_or_default();
        Self::new(true, OpCode::Close, payload)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Get the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload, keeping header bits.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub(crate) fn extend_payload(&mut self, data: &[u8]) {
        self.payload.extend_from_slice(data);
    }

    /// Parse one complete frame from a buffer, unmasking the payload.
    ///
    /// Returns the parsed frame and the number of bytes consumed. This is the
    /// whole-buffer decoder for the client side of a connection, e.g. a peer
    /// reading the unmasked frames a session writes. The session's own read
    /// path goes through [`MessageReader`](crate::protocol::MessageReader).
    ///
    /// ## Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - `Error::ReservedOpcode` if a reserved opcode is used
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = parse_header(buf)?;

        let total_size = header.header_len.saturating_add(header.payload_len);
        if buf.len() < total_size {
            return Err(Error::IncompleteFrame {
                needed: total_size - buf.len(),
            });
        }

        let mut payload = buf[header.header_len..total_size].to_vec();
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        let frame = Frame {
            fin: header.fin,
            rsv1: header.rsv1,
            rsv2: header.rsv2,
            rsv3: header.rsv3,
            opcode: header.opcode,
            payload,
        };

        Ok((frame, total_size))
    }

    /// Check the control frame rules of RFC 6455 Section 5.5.
    ///
    /// # Errors
    ///
    /// - `Error::FragmentedControlFrame` if control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if control frame payload > 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Append the wire encoding of this frame to `buf`.
    ///
    /// `mask` is only used by peers acting as clients; server frames are
    /// written unmasked.
    pub fn write(&self, buf: &mut Vec<u8>, mask: Option<[u8; 4]>) {
        let payload_len = self.payload.len();
        buf.reserve(self.wire_size(mask.is_some()));

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        buf.push(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
        if payload_len <= 125 {
            buf.push(mask_bit | payload_len as u8);
        } else if payload_len <= 65535 {
            buf.push(mask_bit | 126);
            buf.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            buf.push(mask_bit | 127);
            buf.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        match mask {
            Some(mask_key) => {
                buf.extend_from_slice(&mask_key);
                let start = buf.len();
                buf.extend_from_slice(&self.payload);
                apply_mask(&mut buf[start..], mask_key);
            }
            None => buf.extend_from_slice(&self.payload),
        }
    }

    /// Calculate the size needed to write this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let payload_len = self.payload.len();
        let extended_len_size = if payload_len <= 125 {
            0
        } else if payload_len <= 65535 {
            2
        } else {
            8
        };
        let mask_size = if masked { 4 } else { 0 };
        2 + extended_len_size + mask_size + payload_len
    }
}
