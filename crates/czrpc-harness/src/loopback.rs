//! Caller and connection wired back to back in memory.
//!
//! Nothing moves until [`Loopback::pump`] is called, so tests control
//! exactly when requests reach the connection and replies reach the caller.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use czrpc_core::{
    CallFailure, CallTracker, Connection, ConnectionConfig, DispatchError, ObjectData,
    ProcedureTable,
};
use czrpc_proto::Any;

use crate::transport::RecordingTransport;

/// A [`CallTracker`] talking to a [`Connection`] over recording transports.
pub struct Loopback<T: 'static> {
    /// Carries requests from the caller.
    pub requests: Arc<RecordingTransport>,
    /// Carries replies from the connection.
    pub replies: Arc<RecordingTransport>,
    server: Connection<T>,
    client: CallTracker,
}

impl<T: 'static> Loopback<T> {
    /// Serve `object` with `table` and default configuration.
    pub fn new(table: Arc<ProcedureTable<T>>, object: Arc<T>, data: Arc<ObjectData>) -> Self {
        Self::with_config(table, object, data, ConnectionConfig::default())
    }

    /// Serve `object` with `table`, using `config` on both ends.
    pub fn with_config(
        table: Arc<ProcedureTable<T>>,
        object: Arc<T>,
        data: Arc<ObjectData>,
        config: ConnectionConfig,
    ) -> Self {
        let requests = Arc::new(RecordingTransport::new());
        let replies = Arc::new(RecordingTransport::new());

        let server = Connection::new(table, object, Arc::clone(&replies) as _)
            .with_object_data(data)
            .with_config(config.clone());
        let client = CallTracker::with_config(Arc::clone(&requests) as _, config);

        Self { requests, replies, server, client }
    }

    /// Serving side.
    pub fn server(&self) -> &Connection<T> {
        &self.server
    }

    /// Calling side.
    pub fn client(&self) -> &CallTracker {
        &self.client
    }

    /// Deliver queued requests and replies until both directions are empty.
    ///
    /// Returns the number of frames delivered.
    ///
    /// # Errors
    ///
    /// The first connection-fatal error from either side.
    pub fn pump(&self) -> Result<usize, DispatchError> {
        let mut delivered = 0;
        loop {
            let requests = self.requests.take_sent();
            let replies = self.replies.take_sent();
            if requests.is_empty() && replies.is_empty() {
                return Ok(delivered);
            }

            delivered += requests.len() + replies.len();
            for request in requests {
                self.server.receive(&request)?;
            }
            for reply in replies {
                self.client.receive(&reply)?;
            }
        }
    }

    /// Pump until no call is outstanding or `timeout` elapses.
    ///
    /// Needed when deferred results complete on other threads.
    ///
    /// # Errors
    ///
    /// The first connection-fatal error from either side.
    pub fn pump_until_idle(&self, timeout: Duration) -> Result<bool, DispatchError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump()?;
            if self.client.pending_len() == 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Generic call that is pumped to completion.
    ///
    /// Only for procedures that complete synchronously.
    ///
    /// # Errors
    ///
    /// The call's failure, or `Transport` if the exchange broke down.
    pub fn call_generic_now(&self, name: &str, params: Vec<Any>) -> Result<Any, CallFailure> {
        let mut reply = self.client.call_generic(name, params)?;
        self.pump().map_err(|err| CallFailure::Transport(err.to_string()))?;
        if !reply.is_ready() {
            return Err(CallFailure::Transport(format!("no reply to '{name}'")));
        }
        reply.wait().unwrap_or(Err(CallFailure::Canceled))
    }

    /// Run `__auth` with `token` and return the result.
    ///
    /// # Errors
    ///
    /// The call's failure.
    pub fn authenticate(&self, token: &str) -> Result<bool, CallFailure> {
        match self.call_generic_now("__auth", vec![Any::String(token.to_owned())])? {
            Any::Bool(passed) => Ok(passed),
            other => Err(CallFailure::Remote(format!("unexpected __auth result {other:?}"))),
        }
    }
}

impl<T: 'static> std::fmt::Debug for Loopback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loopback")
            .field("server", &self.server)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
