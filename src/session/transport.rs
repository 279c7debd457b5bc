//! Write side of the surrounding connection.

use std::io;

use bytes::Bytes;

/// Byte sink provided by the surrounding server for one connection.
///
/// The session writes complete HTTP responses and complete frames; it never
/// reads through this trait. Inbound bytes are pushed in with
/// [`Session::process_read`](crate::session::Session::process_read).
pub trait Transport {
    /// Queue or write `data` to the peer.
    ///
    /// # Errors
    ///
    /// Any I/O failure. The session treats it as the connection being gone.
    fn send(&mut self, data: Bytes) -> io::Result<()>;

    /// Tear down the connection. Called at most once per session.
    fn close(&mut self);
}
