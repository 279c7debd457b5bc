//! WebSocket Extension Framework (RFC 6455 Section 9).
//!
//! Extensions are split in two halves:
//!
//! - an [`ExtensionFactory`] lives in the shared [`ServerConfig`](crate::ServerConfig)
//!   and decides, per offer, whether to accept and with which parameters;
//! - an [`Extension`] is the per-session instance it produces. Instances are
//!   stateful (a compressor keeps its sliding window between messages) and
//!   are released exactly once when the session closes.
//!
//! Accepted instances form an [`ExtensionChain`]: outgoing messages pass
//! through it in negotiation order, incoming messages in reverse order.
//!
//! # Example
//!
//! ```rust,ignore
//! use wsession::extensions::{Extension, ExtensionFactory, ExtensionParam};
//!
//! struct Identity;
//!
//! impl ExtensionFactory for Identity {
//!     fn name(&self) -> &str { "x-identity" }
//!
//!     fn negotiate(&self, params: &[ExtensionParam], _: &Limits) -> Option<Box<dyn Extension>> {
//!         params.is_empty().then(|| Box::new(IdentityInstance) as Box<dyn Extension>)
//!     }
//! }
//! ```

#[cfg(feature = "compression")]
pub mod deflate;
pub mod negotiator;

pub use negotiator::negotiate_extensions;

use std::fmt;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::Frame;

/// Represents a single extension parameter.
///
/// Extension parameters follow the format: `name; param1=value1; param2`
/// For example: `permessage-deflate; client_max_window_bits=15; server_no_context_takeover`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    /// Parameter name (e.g., "client_max_window_bits").
    pub name: String,
    /// Optional parameter value. None for boolean parameters.
    pub value: Option<String>,
}

impl ExtensionParam {
    /// Create a new parameter with a value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Create a boolean/flag parameter (no value).
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse a single parameter from a string (e.g., "param=value" or "param").
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some((name, value)) = s.split_once('=') {
            Self {
                name: name.trim().to_string(),
                value: Some(value.trim().trim_matches('"').to_string()),
            }
        } else {
            Self::flag(s)
        }
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One extension offer from a Sec-WebSocket-Extensions header.
///
/// For example: `permessage-deflate; client_max_window_bits=15`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    /// Extension name (e.g., "permessage-deflate").
    pub name: String,
    /// Extension parameters, in the order the client sent them.
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    /// Create a new extension offer with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Create a new extension offer with parameters.
    pub fn with_params(name: impl Into<String>, params: Vec<ExtensionParam>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Parse a single extension offer from a string.
    ///
    /// Format: `extension-name; param1=value1; param2`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the extension name or a
    /// parameter name is empty.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let name = parts.next().unwrap_or_default().trim().to_string();

        if name.is_empty() {
            return Err(Error::InvalidExtension("Empty extension name".into()));
        }

        let params = parts
            .map(ExtensionParam::parse)
            .map(|param| {
                if param.name.is_empty() {
                    Err(Error::InvalidExtension(format!(
                        "Empty parameter name in offer for {}",
                        name
                    )))
                } else {
                    Ok(param)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { name, params })
    }

    /// Get a parameter by name.
    pub fn get_param(&self, name: &str) -> Option<&ExtensionParam> {
        self.params.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for ExtensionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for param in &self.params {
            write!(f, "; {}", param)?;
        }
        Ok(())
    }
}

/// RSV bit usage declaration for extensions.
///
/// Extensions must declare which RSV bits they use to prevent conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RsvBits {
    /// Extension uses RSV1 bit (e.g., permessage-deflate).
    pub rsv1: bool,
    /// Extension uses RSV2 bit.
    pub rsv2: bool,
    /// Extension uses RSV3 bit.
    pub rsv3: bool,
}

impl RsvBits {
    /// No RSV bits used.
    pub const NONE: Self = Self {
        rsv1: false,
        rsv2: false,
        rsv3: false,
    };

    /// RSV1 only (used by permessage-deflate).
    pub const RSV1: Self = Self {
        rsv1: true,
        rsv2: false,
        rsv3: false,
    };

    /// Check if any bits conflict with another RsvBits declaration.
    pub fn conflicts_with(&self, other: &RsvBits) -> bool {
        (self.rsv1 && other.rsv1) || (self.rsv2 && other.rsv2) || (self.rsv3 && other.rsv3)
    }

    fn union(self, other: RsvBits) -> RsvBits {
        RsvBits {
            rsv1: self.rsv1 || other.rsv1,
            rsv2: self.rsv2 || other.rsv2,
            rsv3: self.rsv3 || other.rsv3,
        }
    }
}

/// Server-side extension capability, shared by every session.
///
/// Factories are read-only after startup; all per-connection state lives in
/// the [`Extension`] instances they create.
pub trait ExtensionFactory: Send + Sync {
    /// Extension token as used in the Sec-WebSocket-Extensions header.
    fn name(&self) -> &str;

    /// Decide on one offer.
    ///
    /// Returns `None` to decline, which makes the negotiator move on to the
    /// next offer. `limits` are the session's inbound limits; decoders must
    /// not produce payloads larger than `limits.max_message_size`.
    fn negotiate(&self, params: &[ExtensionParam], limits: &Limits)
    -> Option<Box<dyn Extension>>;
}

/// A negotiated, per-session extension instance.
pub trait Extension: Send {
    /// Extension token, same as the factory that created it.
    fn name(&self) -> &str;

    /// Returns which RSV bits this extension uses.
    fn rsv_bits(&self) -> RsvBits {
        RsvBits::NONE
    }

    /// Transform an outgoing message before framing.
    ///
    /// Only data messages are passed in. The extension may rewrite the
    /// payload and set the RSV bits it owns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the payload cannot be transformed.
    fn encode(&mut self, frame: &mut Frame) -> Result<()>;

    /// Transform an incoming, fully reassembled data message.
    ///
    /// Must clear the RSV bits it handled; bits still set afterwards are a
    /// protocol error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] for corrupt payloads and
    /// [`Error::MessageTooLarge`] when decoding exceeds the message limit.
    fn decode(&mut self, frame: &mut Frame) -> Result<()>;

    /// Append this extension's response entry, e.g.
    /// `permessage-deflate; server_no_context_takeover`.
    fn append_response_header(&self, buf: &mut String);

    /// Release resources held by the instance. Called once, at session close.
    ///
    /// # Errors
    ///
    /// Implementations report release failures; the chain keeps releasing
    /// the remaining extensions regardless.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Ordered chain of the extensions negotiated for one session.
///
/// Fixed after the handshake. Encoding runs in negotiation order, decoding
/// in reverse.
#[derive(Default)]
pub struct ExtensionChain {
    extensions: Vec<Box<dyn Extension>>,
    used_rsv_bits: RsvBits,
}

impl ExtensionChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `extension` can be added without an RSV bit conflict.
    pub fn accepts(&self, extension: &dyn Extension) -> bool {
        !self.used_rsv_bits.conflicts_with(&extension.rsv_bits())
    }

    /// Append an extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the extension's RSV bits conflict
    /// with an extension already in the chain.
    pub fn push(&mut self, extension: Box<dyn Extension>) -> Result<()> {
        if !self.accepts(extension.as_ref()) {
            return Err(Error::InvalidExtension(format!(
                "Extension '{}' RSV bits conflict with existing extensions",
                extension.name()
            )));
        }
        self.used_rsv_bits = self.used_rsv_bits.union(extension.rsv_bits());
        self.extensions.push(extension);
        Ok(())
    }

    /// Get the number of extensions.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Check if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Whether an extension with this name is already in the chain.
    pub fn contains(&self, name: &str) -> bool {
        self.extensions
            .iter()
            .any(|e| e.name().eq_ignore_ascii_case(name))
    }

    /// Extension names in negotiation order.
    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    /// RSV bits claimed by the chain.
    pub fn rsv_bits(&self) -> RsvBits {
        self.used_rsv_bits
    }

    /// Encode a message through all extensions, in negotiation order.
    ///
    /// # Errors
    ///
    /// Returns the first extension error.
    pub fn encode(&mut self, frame: &mut Frame) -> Result<()> {
        for extension in &mut self.extensions {
            extension.encode(frame)?;
        }
        Ok(())
    }

    /// Decode a message through all extensions, in reverse negotiation order.
    ///
    /// # Errors
    ///
    /// Returns the first extension error.
    pub fn decode(&mut self, frame: &mut Frame) -> Result<()> {
        for extension in self.extensions.iter_mut().rev() {
            extension.decode(frame)?;
        }
        Ok(())
    }

    /// Release every extension exactly once.
    ///
    /// All extensions are closed even when one fails; the first failure is
    /// returned. The chain is empty afterwards, so a second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first release error.
    pub fn close_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for mut extension in self.extensions.drain(..) {
            if let Err(err) = extension.close() {
                tracing::warn!(extension = extension.name(), error = %err, "Failed to release extension");
                first_error.get_or_insert(err);
            }
        }
        self.used_rsv_bits = RsvBits::NONE;
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for ExtensionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionChain")
            .field("extensions", &self.names())
            .field("used_rsv_bits", &self.used_rsv_bits)
            .finish()
    }
}
