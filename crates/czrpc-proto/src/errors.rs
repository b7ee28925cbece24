//! Protocol error types.

use thiserror::Error;

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding frames.
///
/// Every variant except [`ProtocolError::Encode`] describes bytes received
/// from a peer, and the dispatch layer treats all of them as fatal for the
/// connection they arrived on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than a fixed-size block requires.
    #[error("malformed header: need {expected} bytes, got {actual}")]
    MalformedHeader {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Declared frame size exceeds the configured limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Declared frame size is smaller than its own header.
    #[error("invalid frame size {size}: header alone needs {minimum} bytes")]
    InvalidSize {
        /// Declared frame size.
        size: usize,
        /// Header plus optional debug block.
        minimum: usize,
    },

    /// A field does not fit its bit width.
    #[error("{field} value {value} does not fit in {bits} bits")]
    FieldOverflow {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u64,
        /// Field width.
        bits: u32,
    },

    /// Payload serialization failed.
    #[error("payload encode failed: {0}")]
    Encode(String),

    /// Payload deserialization failed.
    #[error("payload decode failed: {0}")]
    Decode(String),
}
