//! Error types for registration, dispatch and calls.
//!
//! Failures fall into two scopes. Connection-fatal failures
//! ([`DispatchError`]) close the transport and stop processing: malformed
//! frames, out-of-range procedure ids, and calls before authentication.
//! Call-scoped failures never surface as Rust errors on the dispatch side;
//! they become error replies carrying a message, which the caller sees as
//! [`CallFailure::Remote`].

use czrpc_proto::ProtocolError;
use thiserror::Error;

/// Errors raised while building a procedure table.
///
/// All of these are programming errors. Tables are built before any
/// connection is served, so they surface at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Name already used by a procedure or control procedure.
    #[error("procedure name '{0}' is already registered")]
    DuplicateName(String),

    /// Ids must be assigned densely in registration order.
    #[error("procedure '{name}' registered with id {id}, expected {expected}")]
    OutOfOrderId {
        /// Procedure name.
        name: String,
        /// Requested id.
        id: u8,
        /// Next free id.
        expected: usize,
    },

    /// The generic entry must be registered first.
    #[error("generic entry must be registered before '{0}'")]
    GenericEntryMissing(String),

    /// The generic entry can only be registered into an empty table.
    #[error("generic entry must be the first registration")]
    GenericEntryNotFirst,

    /// Procedure ids are limited to 7 bits.
    #[error("procedure id {0} exceeds the 7-bit id space")]
    IdOutOfRange(usize),
}

/// Connection-fatal dispatch failures.
///
/// When one of these is returned the transport has already been closed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Frame could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Direct call to an id outside the procedure table.
    #[error("procedure id {rpc_id} is not registered (table holds {table_len})")]
    InvalidProcedureId {
        /// Requested id.
        rpc_id: u8,
        /// Number of ids in the table.
        table_len: usize,
    },

    /// Call before a successful `__auth`.
    #[error("call to '{procedure}' before authentication")]
    Unauthenticated {
        /// Procedure that was called.
        procedure: String,
    },

    /// Request frame where a reply was expected, or the reverse.
    #[error("unexpected {kind} frame (key {key})")]
    UnexpectedFrame {
        /// "request" or "reply".
        kind: &'static str,
        /// Correlation key of the frame.
        key: u32,
    },

    /// Frame arrived after the connection was closed.
    #[error("connection is closed")]
    ConnectionClosed,
}

/// Failure reported by a procedure body.
///
/// The message is sent verbatim to the caller in an error reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CallError {
    message: String,
}

impl CallError {
    /// Create an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// Message sent to the caller.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for CallError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CallError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Why a call made through [`crate::CallTracker`] did not produce a value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// The remote side replied with an error message.
    #[error("remote error: {0}")]
    Remote(String),

    /// The connection closed before the reply arrived.
    #[error("disconnected before reply")]
    Disconnected,

    /// The reply handle was dropped before completion.
    #[error("call canceled")]
    Canceled,

    /// The request could not be handed to the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Request or reply payload could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
