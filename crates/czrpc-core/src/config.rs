//! Connection configuration.

use czrpc_proto::frame::DEFAULT_MAX_FRAME_SIZE;

/// Settings shared by the dispatch and calling sides of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Attach a [`czrpc_proto::DebugInfo`] block to outgoing requests, and
    /// log every dispatched call at `info` level.
    pub trace_calls: bool,
    /// Largest accepted frame, header included.
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { trace_calls: false, max_frame_size: DEFAULT_MAX_FRAME_SIZE }
    }
}
