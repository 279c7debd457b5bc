//! Session lifecycle states.

/// Lifecycle of a [`Session`](crate::session::Session).
///
/// `PreHandshake` → `Open` → `Closing` → `Closed`. A rejected handshake goes
/// straight from `PreHandshake` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Waiting for the upgrade request.
    #[default]
    PreHandshake,
    /// Handshake completed; messages flow both ways.
    Open,
    /// Close sequence running.
    Closing,
    /// Terminal. Every further operation is a no-op.
    Closed,
}

impl SessionState {
    /// Returns `true` only for `Open`.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, SessionState::Open)
    }

    #[must_use]
    #[inline]
    pub const fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::PreHandshake => write!(f, "PreHandshake"),
            SessionState::Open => write!(f, "Open"),
            SessionState::Closing => write!(f, "Closing"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}
