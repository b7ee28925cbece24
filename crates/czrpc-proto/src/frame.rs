//! Complete frames and frame construction.
//!
//! A frame's header records the frame's total length, which is only known
//! after the payload is serialized. [`FrameBuilder`] therefore reserves the
//! header bytes up front, lets the caller stream payload items into the
//! buffer, and back-patches the header once in [`FrameBuilder::finish`].

use bytes::{Bytes, BytesMut};
use serde::Serialize;

use crate::{
    debug_info::DebugInfo,
    errors::{ProtocolError, Result},
    header::Header,
    payload,
};

/// Default upper bound on a frame's total size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Fixed header. `size` covers the whole frame.
    pub header: Header,
    /// Diagnostic block, present when the header says so.
    pub debug: Option<DebugInfo>,
    /// Payload bytes following the header and debug block.
    pub payload: Bytes,
}

impl Frame {
    /// Assemble a frame from parts.
    ///
    /// The header's size and debug flag are brought in line with the parts
    /// by [`Frame::encode`].
    pub fn new(header: Header, debug: Option<DebugInfo>, payload: impl Into<Bytes>) -> Self {
        Self { header, debug, payload: payload.into() }
    }

    /// Decode one frame from the front of `bytes`.
    ///
    /// Trailing bytes beyond the header's `size` are ignored.
    ///
    /// # Errors
    ///
    /// - `MalformedHeader` if `bytes` is shorter than the header, the debug
    ///   block, or the declared size
    /// - `InvalidSize` if the declared size cannot hold header and debug block
    /// - `FrameTooLarge` if the declared size exceeds `max_size`
    pub fn decode(bytes: &[u8], max_size: usize) -> Result<Self> {
        let header = Header::from_bytes(bytes)?;
        let size = check_size(&header, max_size)?;

        if bytes.len() < size {
            return Err(ProtocolError::MalformedHeader { expected: size, actual: bytes.len() });
        }

        let debug = if header.has_debug_info() {
            Some(DebugInfo::from_bytes(&bytes[Header::SIZE..])?)
        } else {
            None
        };

        let start = Header::SIZE + header.debug_block_len();
        Ok(Self { header, debug, payload: Bytes::copy_from_slice(&bytes[start..size]) })
    }

    /// Encode to wire bytes, filling in `size` and the debug flag.
    pub fn encode(&self) -> Result<Bytes> {
        let mut builder = FrameBuilder::new(self.header, self.debug.as_ref());
        builder.payload_mut().extend_from_slice(&self.payload);
        builder.finish()
    }
}

/// Validate a header's declared size and return it as `usize`.
pub(crate) fn check_size(header: &Header, max_size: usize) -> Result<usize> {
    let size = header.size() as usize;
    let minimum = Header::SIZE + header.debug_block_len();

    if size < minimum {
        return Err(ProtocolError::InvalidSize { size, minimum });
    }
    if size > max_size {
        return Err(ProtocolError::FrameTooLarge { size, max: max_size });
    }
    Ok(size)
}

/// Builds a frame with a back-patched header.
#[derive(Debug)]
pub struct FrameBuilder {
    header: Header,
    buf: BytesMut,
}

impl FrameBuilder {
    /// Start a frame: reserve the header and write the debug block, if any.
    pub fn new(mut header: Header, debug: Option<&DebugInfo>) -> Self {
        header.set_debug_info(debug.is_some());

        let mut buf = BytesMut::with_capacity(64);
        buf.extend_from_slice(&[0u8; Header::SIZE]);
        if let Some(debug) = debug {
            buf.extend_from_slice(&debug.to_bytes());
        }

        Self { header, buf }
    }

    /// Header as it will be written, minus the final size.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Append one CBOR item to the payload.
    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        payload::write(value, &mut self.buf)
    }

    /// Raw access to the frame buffer for callers with their own encoding.
    ///
    /// Bytes before the current end belong to the header and debug block and
    /// must not be modified.
    pub fn payload_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Patch the header with the final size and return the frame bytes.
    ///
    /// # Errors
    ///
    /// `FieldOverflow` if the frame is longer than `u32::MAX` bytes.
    pub fn finish(mut self) -> Result<Bytes> {
        let len = self.buf.len();
        let size = u32::try_from(len).map_err(|_| ProtocolError::FieldOverflow {
            field: "size",
            value: len as u64,
            bits: 32,
        })?;

        self.header.set_size(size);
        self.buf[..Header::SIZE].copy_from_slice(&self.header.to_bytes());
        Ok(self.buf.freeze())
    }
}
