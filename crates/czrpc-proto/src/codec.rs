//! Streaming frame accumulator.
//!
//! Transports hand over whatever a read returned: part of a header, part of
//! a payload, or several frames back to back. The accumulator buffers input
//! until the header's `size` bytes are present and yields complete frames in
//! arrival order.
//!
//! A header that fails validation poisons the stream: there is no way to
//! resynchronise a length-prefixed byte stream, so the error is returned and
//! the connection is expected to close.

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::{
    errors::Result,
    frame::{DEFAULT_MAX_FRAME_SIZE, Frame, check_size},
    header::Header,
};

/// Reassembles frames from arbitrary byte chunks.
#[derive(Debug)]
pub struct FrameAccumulator {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameAccumulator {
    /// Create an accumulator that rejects frames larger than `max_frame_size`.
    pub fn new(max_frame_size: usize) -> Self {
        Self { buf: BytesMut::new(), max_frame_size }
    }

    /// Feed bytes and return every frame they complete.
    ///
    /// # Errors
    ///
    /// Returns the first header validation error. Frames completed before the
    /// bad header are discarded along with it.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buf.extend_from_slice(data);

        let mut frames = Vec::new();
        while self.buf.len() >= Header::SIZE {
            let header = Header::from_bytes(&self.buf)?;
            let size = match check_size(&header, self.max_frame_size) {
                Ok(size) => size,
                Err(err) => {
                    warn!(
                        %err,
                        counter = header.counter(),
                        rpc_id = header.rpc_id(),
                        discarded = frames.len(),
                        "rejecting frame header"
                    );
                    return Err(err);
                },
            };
            if self.buf.len() < size {
                trace!(size, buffered = self.buf.len(), "waiting for rest of frame");
                break;
            }

            let raw = self.buf.split_to(size);
            match Frame::decode(&raw, self.max_frame_size) {
                Ok(frame) => frames.push(frame),
                Err(err) => {
                    warn!(%err, size, "rejecting frame body");
                    return Err(err);
                },
            }
        }

        Ok(frames)
    }

    /// Bytes buffered towards an incomplete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial frame (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        if !self.buf.is_empty() {
            debug!(dropped = self.buf.len(), "discarding partial frame");
        }
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;

    use super::*;
    use crate::{DebugInfo, FrameBuilder, ProtocolError};

    fn request(counter: u32, text: &str) -> Bytes {
        let mut builder = FrameBuilder::new(Header::request(counter, 0), None);
        builder.write(text).unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn yields_frames_split_across_reads() {
        let bytes = request(1, "split me");
        let mut acc = FrameAccumulator::default();

        assert!(acc.feed(&bytes[..3]).unwrap().is_empty());
        assert!(acc.feed(&bytes[3..10]).unwrap().is_empty());
        let frames = acc.feed(&bytes[10..]).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.counter(), 1);
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn yields_concatenated_frames_in_order() {
        let mut stream = request(1, "a").to_vec();
        stream.extend_from_slice(&request(2, "b"));
        stream.extend_from_slice(&request(3, "c")[..4]);

        let mut acc = FrameAccumulator::default();
        let frames = acc.feed(&stream).unwrap();

        let counters: Vec<u32> = frames.iter().map(|f| f.header.counter()).collect();
        assert_eq!(counters, vec![1, 2]);
        assert_eq!(acc.pending_len(), 4);
    }

    #[test]
    fn traced_frames_are_reassembled() {
        let debug = DebugInfo::new("trace.rs", 9);
        let mut builder = FrameBuilder::new(Header::request(5, 3), Some(&debug));
        builder.write(&(1u32,)).unwrap();
        let bytes = builder.finish().unwrap();

        let mut acc = FrameAccumulator::default();
        assert!(acc.feed(&bytes[..100]).unwrap().is_empty());
        let frames = acc.feed(&bytes[100..]).unwrap();
        assert_eq!(frames[0].debug.as_ref(), Some(&debug));
    }

    #[test]
    fn oversized_header_poisons_stream() {
        let mut header = Header::request(1, 1);
        header.set_size(4096);

        let mut acc = FrameAccumulator::new(1024);
        let err = acc.feed(&header.to_bytes()).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { size: 4096, max: 1024 }));
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_frames(
            texts in prop::collection::vec("[a-z]{0,40}", 1..6),
            chunk in 1usize..32,
        ) {
            let stream: Vec<u8> = texts
                .iter()
                .enumerate()
                .flat_map(|(i, t)| request(i as u32, t).to_vec())
                .collect();

            let mut acc = FrameAccumulator::default();
            let mut frames = Vec::new();
            for piece in stream.chunks(chunk) {
                frames.extend(acc.feed(piece).unwrap());
            }

            prop_assert_eq!(frames.len(), texts.len());
            for (i, frame) in frames.iter().enumerate() {
                prop_assert_eq!(frame.header.counter(), i as u32);
            }
            prop_assert_eq!(acc.pending_len(), 0);
        }
    }
}
