//! Reply frame formatting.
//!
//! A reply copies the request's counter and procedure id, sets `is_reply`
//! and `success`, and carries either the encoded return value or a single
//! error string. The size field is back-patched once the payload is written.

use std::sync::Arc;

use czrpc_proto::{FrameBuilder, Header};
use tracing::{error, trace, warn};

use crate::{
    table::{CallKind, CallResult},
    transport::Transport,
};

/// Error text for a generic call to an unknown name.
pub const GENERIC_RPC_NOT_FOUND: &str = "Generic RPC not found";
/// Error text for generic parameters that do not fit the procedure.
pub const INVALID_GENERIC_PARAMETERS: &str = "Invalid parameters for generic RPC";
/// Error text for typed parameters that fail to decode.
pub const INVALID_PARAMETERS: &str = "Invalid parameters for RPC";
/// Error text when a deferred result is dropped without completing.
pub const DEFERRED_ABANDONED: &str = "Deferred result abandoned";

/// Builds replies and pushes them to the transport.
#[derive(Clone)]
pub(crate) struct ReplySender {
    transport: Arc<dyn Transport>,
}

impl ReplySender {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Send an error reply carrying `message`.
    pub(crate) fn error(&self, request: &Header, message: &str) {
        match error_frame(request, message) {
            Ok(frame) => self.push(request, frame),
            Err(err) => error!(counter = request.counter(), %err, "failed to encode error reply"),
        }
    }

    /// Send the reply for a finished invocation.
    ///
    /// A return value that fails to encode is reported to the caller as an
    /// error reply.
    pub(crate) fn result(&self, request: &Header, kind: CallKind, result: CallResult) {
        match result {
            Ok(value) => {
                let mut builder = FrameBuilder::new(request.reply(true), None);
                match value.encode(kind, &mut builder).and_then(|()| builder.finish()) {
                    Ok(frame) => self.push(request, frame),
                    Err(err) => {
                        warn!(counter = request.counter(), %err, "failed to encode return value");
                        self.error(request, &err.to_string());
                    },
                }
            },
            Err(err) => self.error(request, err.message()),
        }
    }

    fn push(&self, request: &Header, frame: bytes::Bytes) {
        trace!(counter = request.counter(), rpc_id = request.rpc_id(), len = frame.len(), "sending reply");
        if let Err(err) = self.transport.send(frame) {
            warn!(counter = request.counter(), %err, "failed to send reply");
        }
    }
}

fn error_frame(request: &Header, message: &str) -> czrpc_proto::Result<bytes::Bytes> {
    let mut builder = FrameBuilder::new(request.reply(false), None);
    builder.write(message)?;
    builder.finish()
}
