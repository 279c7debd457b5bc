//! Permessage-deflate WebSocket compression extension (RFC 7692).
//!
//! The compressor and decompressor are stateful: unless a
//! `*_no_context_takeover` parameter was agreed, the LZ77 window carries
//! over from one message to the next.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::extensions::{Extension, ExtensionFactory, ExtensionParam, RsvBits};
use crate::protocol::Frame;

/// Extension token.
pub const EXTENSION_NAME: &str = "permessage-deflate";

const MIN_WINDOW_BITS: u8 = 8;
// zlib cannot produce raw deflate streams with a 256-byte window.
const MIN_SERVER_WINDOW_BITS: u8 = 9;
const MAX_WINDOW_BITS: u8 = 15;
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Server preferences for permessage-deflate.
#[derive(Debug, Clone)]
pub struct DeflateConfig {
    /// Always ask for (and honour) a fresh compression context per message.
    pub server_no_context_takeover: bool,
    /// Always require the client to reset its context per message.
    pub client_no_context_takeover: bool,
    /// Largest window the server compresses with.
    pub server_max_window_bits: u8,
    /// Largest window the client may compress with, if it lets us choose.
    pub client_max_window_bits: u8,
    /// zlib compression level, 0-9.
    pub compression_level: u32,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: MAX_WINDOW_BITS,
            client_max_window_bits: MAX_WINDOW_BITS,
            compression_level: 6,
        }
    }
}

impl DeflateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_no_context_takeover(mut self, value: bool) -> Self {
        self.server_no_context_takeover = value;
        self
    }

    pub fn client_no_context_takeover(mut self, value: bool) -> Self {
        self.client_no_context_takeover = value;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] unless `bits` is in 9-15.
    pub fn server_max_window_bits(mut self, bits: u8) -> Result<Self> {
        if !(MIN_SERVER_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
            return Err(Error::InvalidExtension(format!(
                "server_max_window_bits must be {}-{}, got {}",
                MIN_SERVER_WINDOW_BITS, MAX_WINDOW_BITS, bits
            )));
        }
        self.server_max_window_bits = bits;
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] unless `bits` is in 8-15.
    pub fn client_max_window_bits(mut self, bits: u8) -> Result<Self> {
        if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
            return Err(Error::InvalidExtension(format!(
                "client_max_window_bits must be {}-{}, got {}",
                MIN_WINDOW_BITS, MAX_WINDOW_BITS, bits
            )));
        }
        self.client_max_window_bits = bits;
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if `level` is above 9.
    pub fn compression_level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidExtension(format!(
                "compression_level must be 0-9, got {}",
                level
            )));
        }
        self.compression_level = level;
        Ok(self)
    }
}

/// Parameters both sides agreed on for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Agreement {
    server_no_context_takeover: bool,
    client_no_context_takeover: bool,
    /// `Some` when the response carries `server_max_window_bits`.
    server_max_window_bits: Option<u8>,
    /// `Some` when the response carries `client_max_window_bits`.
    client_max_window_bits: Option<u8>,
}

fn parse_window_bits(value: &str) -> Option<u8> {
    if value.starts_with('0') {
        return None;
    }
    value
        .parse::<u8>()
        .ok()
        .filter(|bits| (MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(bits))
}

/// Permessage-deflate capability, registered in the server configuration.
#[derive(Debug, Clone, Default)]
pub struct PerMessageDeflate {
    config: DeflateConfig,
}

impl PerMessageDeflate {
    pub fn new(config: DeflateConfig) -> Self {
        Self { config }
    }

    /// Apply RFC 7692 Section 7.1 to one offer. `None` declines it.
    fn accept(&self, params: &[ExtensionParam]) -> Option<Agreement> {
        let mut agreement = Agreement {
            server_no_context_takeover: self.config.server_no_context_takeover,
            client_no_context_takeover: self.config.client_no_context_takeover,
            server_max_window_bits: None,
            client_max_window_bits: None,
        };
        let mut requested_server_bits = None;
        let mut client_window_limit = None;
        let mut seen: Vec<&str> = Vec::with_capacity(params.len());

        for param in params {
            let name = param.name.as_str();
            if seen.contains(&name) {
                return None;
            }
            seen.push(name);

            match name {
                "server_no_context_takeover" if param.value.is_none() => {
                    agreement.server_no_context_takeover = true;
                }
                "client_no_context_takeover" if param.value.is_none() => {
                    agreement.client_no_context_takeover = true;
                }
                "server_max_window_bits" => {
                    let bits = parse_window_bits(param.value.as_deref()?)?;
                    requested_server_bits = Some(bits);
                }
                "client_max_window_bits" => {
                    let limit = match param.value.as_deref() {
                        Some(value) => parse_window_bits(value)?,
                        None => MAX_WINDOW_BITS,
                    };
                    client_window_limit = Some(limit);
                }
                _ => return None,
            }
        }

        let server_bits = requested_server_bits.map_or(self.config.server_max_window_bits, |b| {
            b.min(self.config.server_max_window_bits)
        });
        if server_bits < MIN_SERVER_WINDOW_BITS {
            return None;
        }
        if requested_server_bits.is_some() || server_bits < MAX_WINDOW_BITS {
            agreement.server_max_window_bits = Some(server_bits);
        }

        if let Some(limit) = client_window_limit {
            if self.config.client_max_window_bits < MAX_WINDOW_BITS {
                agreement.client_max_window_bits =
                    Some(self.config.client_max_window_bits.min(limit));
            }
        }

        Some(agreement)
    }
}

impl ExtensionFactory for PerMessageDeflate {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn negotiate(
        &self,
        params: &[ExtensionParam],
        limits: &Limits,
    ) -> Option<Box<dyn Extension>> {
        let agreement = self.accept(params)?;
        Some(Box::new(DeflateExtension::new(
            &self.config,
            agreement,
            limits.max_message_size,
        )))
    }
}

/// Per-session permessage-deflate state.
pub struct DeflateExtension {
    agreement: Agreement,
    compressor: Compress,
    decompressor: Decompress,
    max_message_size: usize,
    released: bool,
}

impl DeflateExtension {
    fn new(config: &DeflateConfig, agreement: Agreement, max_message_size: usize) -> Self {
        let window_bits = agreement
            .server_max_window_bits
            .unwrap_or(config.server_max_window_bits)
            .max(MIN_SERVER_WINDOW_BITS);
        Self {
            agreement,
            compressor: Compress::new_with_window_bits(
                Compression::new(config.compression_level),
                false,
                window_bits,
            ),
            decompressor: Decompress::new(false),
            max_message_size,
            released: false,
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.released {
            return Err(Error::Extension("permessage-deflate already released".into()));
        }
        Ok(())
    }

    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(input.len() / 2 + 64);
        let start = self.compressor.total_in();

        loop {
            let consumed = (self.compressor.total_in() - start) as usize;
            if output.len() == output.capacity() {
                output.reserve(output.capacity().max(64));
            }
            self.compressor
                .compress_vec(&input[consumed..], &mut output, FlushCompress::Sync)
                .map_err(|e| Error::Extension(format!("Compression failed: {}", e)))?;

            let consumed = (self.compressor.total_in() - start) as usize;
            if consumed == input.len() && output.len() < output.capacity() {
                break;
            }
        }

        if output.ends_with(&DEFLATE_TRAILER) {
            output.truncate(output.len() - DEFLATE_TRAILER.len());
        }
        if self.agreement.server_no_context_takeover {
            self.compressor.reset();
        }
        Ok(output)
    }

    fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let limit = self.max_message_size;
        let mut data = Vec::with_capacity(input.len() + DEFLATE_TRAILER.len());
        data.extend_from_slice(input);
        data.extend_from_slice(&DEFLATE_TRAILER);

        let initial = input
            .len()
            .saturating_mul(4)
            .saturating_add(64)
            .min(limit.saturating_add(1));
        let mut output = Vec::with_capacity(initial);
        let start = self.decompressor.total_in();

        loop {
            let consumed = (self.decompressor.total_in() - start) as usize;
            if output.len() == output.capacity() {
                let room = (limit.saturating_add(1) - output.len()).min(output.capacity().max(1024));
                output.reserve_exact(room);
            }
            let status = self
                .decompressor
                .decompress_vec(&data[consumed..], &mut output, FlushDecompress::Sync)
                .map_err(|e| Error::Extension(format!("Decompression failed: {}", e)))?;

            if output.len() > limit {
                return Err(Error::MessageTooLarge {
                    size: output.len(),
                    max: limit,
                });
            }

            let consumed = (self.decompressor.total_in() - start) as usize;
            let has_room = output.len() < output.capacity();
            match status {
                Status::StreamEnd => break,
                Status::BufError if has_room => break,
                _ if consumed == data.len() && has_room => break,
                _ => {}
            }
        }

        if self.agreement.client_no_context_takeover {
            self.decompressor.reset(false);
        }
        Ok(output)
    }
}

impl Extension for DeflateExtension {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn rsv_bits(&self) -> RsvBits {
        RsvBits::RSV1
    }

    fn encode(&mut self, frame: &mut Frame) -> Result<()> {
        self.ensure_active()?;
        if frame.opcode.is_control() || frame.payload().is_empty() {
            return Ok(());
        }

        let compressed = self.compress(frame.payload())?;
        frame.set_payload(compressed);
        frame.rsv1 = true;
        Ok(())
    }

    fn decode(&mut self, frame: &mut Frame) -> Result<()> {
        self.ensure_active()?;
        if !frame.rsv1 {
            return Ok(());
        }
        if frame.opcode.is_control() {
            return Err(Error::Extension("RSV1 set on control frame".to_string()));
        }

        let decompressed = self.decompress(frame.payload())?;
        frame.set_payload(decompressed);
        frame.rsv1 = false;
        Ok(())
    }

    fn append_response_header(&self, buf: &mut String) {
        buf.push_str(EXTENSION_NAME);
        if self.agreement.server_no_context_takeover {
            buf.push_str("; server_no_context_takeover");
        }
        if self.agreement.client_no_context_takeover {
            buf.push_str("; client_no_context_takeover");
        }
        if let Some(bits) = self.agreement.server_max_window_bits {
            buf.push_str(&format!("; server_max_window_bits={}", bits));
        }
        if let Some(bits) = self.agreement.client_max_window_bits {
            buf.push_str(&format!("; client_max_window_bits={}", bits));
        }
    }

    fn close(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            self.compressor.reset();
            self.decompressor.reset(false);
        }
        Ok(())
    }
}
