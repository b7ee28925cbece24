//! Recording in-memory transport.

use std::{
    io,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use czrpc_core::Transport;
use czrpc_proto::{Frame, frame::DEFAULT_MAX_FRAME_SIZE};

/// Transport that keeps every sent frame until a test takes it.
///
/// Sends fail once the transport is closed.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
}

impl RecordingTransport {
    /// Open transport with nothing sent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return the frames sent so far, oldest first.
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Remove the frames sent so far and decode them.
    ///
    /// Frames that fail to decode are skipped; everything this crate's
    /// peers send is well-formed.
    pub fn take_frames(&self) -> Vec<Frame> {
        self.take_sent()
            .iter()
            .filter_map(|bytes| Frame::decode(bytes, DEFAULT_MAX_FRAME_SIZE).ok())
            .collect()
    }

    /// Number of frames waiting to be taken.
    pub fn sent_len(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if [`Transport::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Transport for RecordingTransport {
    fn send(&self, frame: Bytes) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_until_closed() {
        let transport = RecordingTransport::new();
        transport.send(Bytes::from_static(b"one")).unwrap();
        transport.close();

        assert!(transport.send(Bytes::from_static(b"two")).is_err());
        assert!(transport.is_closed());
        assert_eq!(transport.take_sent(), vec![Bytes::from_static(b"one")]);
        assert_eq!(transport.sent_len(), 0);
    }
}
