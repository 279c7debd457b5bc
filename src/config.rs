//! Configuration and limits for WebSocket sessions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::extensions::ExtensionFactory;

/// Payload size limits for inbound traffic.
///
/// These limits prevent resource exhaustion attacks and ensure
/// bounded memory usage. Both are checked before any extension decodes
/// a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single frame in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a complete message in bytes.
    ///
    /// This applies to the running total while reassembling fragments and
    /// to the payload produced by extension decoding.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_frame_size: usize, max_message_size: usize) -> Self {
        Self {
            max_frame_size,
            max_message_size,
        }
    }

    /// Create limits suitable for small embedded systems.
    ///
    /// - Max frame: 64 KB
    /// - Max message: 256 KB
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`](crate::Error::FrameTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_frame_size {
            Err(crate::Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Server-wide WebSocket configuration.
///
/// Built once at startup and shared read-only between sessions behind an
/// [`Arc`].
#[derive(Clone)]
pub struct ServerConfig {
    /// Resource limits.
    pub limits: Limits,

    /// Sub-protocols the server supports, in no particular order.
    ///
    /// The client's preference order decides which one is selected.
    pub protocols: Vec<String>,

    /// Extension capabilities available for negotiation.
    pub extensions: Vec<Arc<dyn ExtensionFactory>>,

    /// Idle time after which a liveness ping is sent.
    ///
    /// Default: 30 seconds
    pub keep_alive: Duration,

    /// Accept unmasked frames from clients.
    ///
    /// RFC 6455 requires clients to mask all frames. Setting this to `true`
    /// violates the protocol but is useful for loopback testing.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,

    /// Read buffer size used by the async driver (in bytes).
    ///
    /// Default: 8 KB (8192)
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            protocols: Vec::new(),
            extensions: Vec::new(),
            keep_alive: Duration::from_secs(30),
            accept_unmasked_frames: false,
            read_buffer_size: 8192,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default limits and no extensions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Add a supported sub-protocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Add an extension capability.
    #[must_use]
    pub fn with_extension(mut self, extension: Arc<dyn ExtensionFactory>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Enable permessage-deflate with the given parameters.
    #[cfg(feature = "compression")]
    #[must_use]
    pub fn with_deflate(self, config: crate::extensions::deflate::DeflateConfig) -> Self {
        self.with_extension(Arc::new(crate::extensions::deflate::PerMessageDeflate::new(
            config,
        )))
    }

    /// Set the keep-alive interval.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Accept unmasked client frames.
    #[must_use]
    pub const fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Whether `protocol` is one of the configured sub-protocols.
    #[must_use]
    pub fn is_supported_protocol(&self, protocol: &str) -> bool {
        self.protocols.iter().any(|p| p == protocol)
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("limits", &self.limits)
            .field("protocols", &self.protocols)
            .field(
                "extensions",
                &self.extensions.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .field("keep_alive", &self.keep_alive)
            .field("accept_unmasked_frames", &self.accept_unmasked_frames)
            .field("read_buffer_size", &self.read_buffer_size)
            .finish()
    }
}
