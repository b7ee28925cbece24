//! Byte pipe abstraction.
//!
//! The dispatch layer only pushes whole frames and asks for the pipe to be
//! closed. Accepting connections, reading, and the socket itself belong to
//! the transport implementation, which feeds received bytes to
//! [`crate::Connection::receive`] or [`crate::CallTracker::receive`] and calls
//! their `shutdown`/`abort_all` from its disconnect notification.
//!
//! Transports are shared with deferred-result completions, which may run on
//! any thread, hence the `Send + Sync` bound and `&self` receivers.

use std::io;

use bytes::Bytes;

/// Reliable, ordered byte stream to one peer.
pub trait Transport: Send + Sync + 'static {
    /// Queue one complete frame for sending.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe is closed or the write fails.
    fn send(&self, frame: Bytes) -> io::Result<()>;

    /// Close the pipe. Further sends fail; idempotent.
    fn close(&self);
}
