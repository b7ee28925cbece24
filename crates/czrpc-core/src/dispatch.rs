//! Per-connection dispatch engine.
//!
//! A [`Connection`] turns inbound request frames into procedure invocations
//! and replies. It runs on whatever thread hands it bytes and never blocks
//! on a procedure's deferred result.
//!
//! # Dispatch steps
//!
//! ```text
//!  frame ──▶ rpc_id == 0 ? read name, lookup_by_name ── missing ──▶ "Generic RPC not found"
//!        │                                            (reply, connection stays open)
//!        └─▶ rpc_id != 0 ? lookup_by_id ── missing ──▶ InvalidProcedureId (close)
//!                 │
//!                 ▼
//!            auth gate ── not authenticated, not __auth ──▶ Unauthenticated (close, no reply)
//!                 │
//!                 ▼
//!            decode params ── mismatch ──▶ "Invalid parameters ..." reply
//!                 │
//!                 ▼
//!            invoke ──▶ ready ──▶ reply now
//!                 └───▶ deferred ──▶ PendingCalls ──▶ reply on completion
//! ```
//!
//! Wire-level and authentication failures close the transport and are
//! returned as [`DispatchError`]. Everything call-scoped becomes an error
//! reply and leaves the connection usable.
//!
//! # Teardown
//!
//! [`Connection::shutdown`] (also run on drop) blocks until every deferred
//! result has completed and its reply has been sent. Afterwards inbound
//! frames are rejected with [`DispatchError::ConnectionClosed`].

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use czrpc_proto::{Frame, FrameAccumulator, Header, payload};
use tracing::{debug, debug_span, field, info, warn};

use crate::{
    config::ConnectionConfig,
    deferred::{Canceled, Deferred},
    error::{CallError, DispatchError},
    lock,
    object::ObjectData,
    pending::PendingCalls,
    reply::{
        DEFERRED_ABANDONED, GENERIC_RPC_NOT_FOUND, INVALID_GENERIC_PARAMETERS, INVALID_PARAMETERS,
        ReplySender,
    },
    table::{AUTH, CallKind, CallResult, Invocation, ProcedureTable, Resolved, Session},
    transport::Transport,
};

/// Dispatch state of one connection serving an object of type `T`.
pub struct Connection<T: 'static> {
    table: Arc<ProcedureTable<T>>,
    object: Arc<T>,
    session: Session,
    replies: ReplySender,
    pending: Arc<PendingCalls>,
    transport: Arc<dyn Transport>,
    accumulator: Mutex<FrameAccumulator>,
    /// No further frames are processed.
    closed: AtomicBool,
    /// Pending calls have been drained.
    torn_down: AtomicBool,
    config: ConnectionConfig,
}

impl<T: 'static> Connection<T> {
    /// Serve `object` over `transport` using the procedures in `table`.
    ///
    /// The object starts without properties or auth token; see
    /// [`Connection::with_object_data`].
    pub fn new(
        table: Arc<ProcedureTable<T>>,
        object: Arc<T>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let config = ConnectionConfig::default();
        Self {
            table,
            object,
            session: Session::new(Arc::new(ObjectData::new())),
            replies: ReplySender::new(Arc::clone(&transport)),
            pending: Arc::new(PendingCalls::new()),
            transport,
            accumulator: Mutex::new(FrameAccumulator::new(config.max_frame_size)),
            closed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            config,
        }
    }

    /// Use `data` for authentication and property access.
    #[must_use]
    pub fn with_object_data(mut self, data: Arc<ObjectData>) -> Self {
        self.session = Session::new(data);
        self
    }

    /// Replace the default configuration.
    #[must_use]
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.accumulator = Mutex::new(FrameAccumulator::new(config.max_frame_size));
        self.config = config;
        self
    }

    /// Feed bytes read from the transport and dispatch every complete frame.
    ///
    /// # Errors
    ///
    /// Returns the first connection-fatal error. The transport is closed and
    /// remaining frames in `bytes` are discarded.
    pub fn receive(&self, bytes: &[u8]) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::ConnectionClosed);
        }

        let frames = match lock(&self.accumulator).feed(bytes) {
            Ok(frames) => frames,
            Err(err) => return Err(self.fail(err.into())),
        };

        for frame in frames {
            self.dispatch_frame(frame)?;
        }
        Ok(())
    }

    /// Dispatch one decoded request frame.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after shutdown or a previous fatal error
    /// - `UnexpectedFrame` for a reply frame
    /// - `InvalidProcedureId` for a direct call outside the table
    /// - `Unauthenticated` for a call other than `__auth` before
    ///   authentication
    pub fn dispatch_frame(&self, frame: Frame) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::ConnectionClosed);
        }

        let header = frame.header;
        if header.is_reply() {
            return Err(self.fail(DispatchError::UnexpectedFrame { kind: "reply", key: header.key() }));
        }

        let span = debug_span!(
            "dispatch",
            table = self.table.name(),
            counter = header.counter(),
            rpc_id = header.rpc_id(),
            seq = field::Empty,
            file = field::Empty,
            line = field::Empty,
        );
        if let Some(debug) = &frame.debug {
            span.record("seq", debug.num());
            span.record("file", debug.file());
            span.record("line", debug.line());
        }
        let _entered = span.enter();

        let mut input: &[u8] = &frame.payload;
        if header.is_generic_rpc() {
            self.dispatch_generic(&header, &mut input)
        } else {
            self.dispatch_direct(&header, &mut input)
        }
    }

    fn dispatch_generic(&self, header: &Header, input: &mut &[u8]) -> Result<(), DispatchError> {
        let name = match payload::read::<String>(input) {
            Ok(name) => name,
            Err(err) => {
                debug!(%err, "generic call without a readable procedure name");
                self.replies.error(header, GENERIC_RPC_NOT_FOUND);
                return Ok(());
            },
        };

        let Some(resolved) = self.table.lookup_by_name(&name) else {
            warn!(procedure = %name, "generic call to unknown procedure");
            self.replies.error(header, GENERIC_RPC_NOT_FOUND);
            return Ok(());
        };

        self.authorize(resolved.name())?;
        self.trace_call(resolved.name(), CallKind::Generic);

        let invocation = match resolved {
            Resolved::Procedure(entry) => match entry.handler() {
                Some(handler) => handler.invoke(&self.object, input, CallKind::Generic),
                None => {
                    self.replies.error(header, GENERIC_RPC_NOT_FOUND);
                    return Ok(());
                },
            },
            Resolved::Control(entry) => entry.handler().invoke(&self.session, input),
        };

        self.complete(header, &name, CallKind::Generic, invocation);
        Ok(())
    }

    fn dispatch_direct(&self, header: &Header, input: &mut &[u8]) -> Result<(), DispatchError> {
        let rpc_id = header.rpc_id();
        let Some((entry, handler)) = self
            .table
            .lookup_by_id(rpc_id)
            .and_then(|entry| entry.handler().map(|handler| (entry, handler)))
        else {
            return Err(self.fail(DispatchError::InvalidProcedureId {
                rpc_id,
                table_len: self.table.len(),
            }));
        };

        self.authorize(entry.name())?;
        self.trace_call(entry.name(), CallKind::Direct);

        let invocation = handler.invoke(&self.object, input, CallKind::Direct);
        self.complete(header, entry.name(), CallKind::Direct, invocation);
        Ok(())
    }

    fn authorize(&self, procedure: &str) -> Result<(), DispatchError> {
        if procedure == AUTH || self.session.is_authenticated() {
            return Ok(());
        }
        Err(self.fail(DispatchError::Unauthenticated { procedure: procedure.to_owned() }))
    }

    fn trace_call(&self, procedure: &str, kind: CallKind) {
        if self.config.trace_calls {
            info!(procedure, ?kind, "dispatching call");
        } else {
            debug!(procedure, ?kind, "dispatching call");
        }
    }

    fn complete(&self, header: &Header, procedure: &str, kind: CallKind, invocation: Invocation) {
        match invocation {
            Invocation::InvalidParameters => {
                warn!(procedure, "parameters do not match procedure signature");
                let message = match kind {
                    CallKind::Generic => INVALID_GENERIC_PARAMETERS,
                    CallKind::Direct => INVALID_PARAMETERS,
                };
                self.replies.error(header, message);
            },
            Invocation::Ready(result) => {
                if let Err(err) = &result {
                    warn!(procedure, %err, "procedure failed");
                }
                self.replies.result(header, kind, result);
            },
            Invocation::Deferred(result) => self.track(*header, kind, result),
        }
    }

    /// Register a deferred call and send its reply once it completes.
    ///
    /// The entry exists before the continuation is attached, so a result
    /// that is already available finds it. A call whose procedure returned
    /// after teardown started is answered as abandoned and never tracked.
    fn track(&self, header: Header, kind: CallKind, result: Deferred<CallResult>) {
        let Some(counter) = self.pending.register() else {
            warn!(counter = header.counter(), "deferred call returned after shutdown");
            self.replies.error(&header, DEFERRED_ABANDONED);
            return;
        };
        let replies = self.replies.clone();
        let pending = Arc::clone(&self.pending);

        let handle = result.then(move |outcome| {
            let result = outcome.unwrap_or_else(|Canceled| Err(CallError::new(DEFERRED_ABANDONED)));
            if let Err(err) = &result {
                warn!(counter = header.counter(), %err, "deferred call failed");
            }
            replies.result(&header, kind, result);
            pending.retire(counter);
        });

        self.pending.attach(counter, handle);
    }

    /// Close the transport and stop processing frames.
    fn fail(&self, err: DispatchError) -> DispatchError {
        warn!(%err, "closing connection");
        self.closed.store(true, Ordering::Release);
        self.transport.close();
        err
    }

    /// Close the connection and wait for every deferred call to finish.
    ///
    /// Idempotent. Call it from the transport's disconnect notification.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(table = self.table.name(), pending = self.pending.len(), "shutting down connection");
        self.transport.close();
        self.pending.drain_and_wait();
    }

    /// Check if frames are no longer processed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Check if `__auth` last succeeded on this connection.
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// In-flight deferred calls.
    pub fn pending_calls(&self) -> &PendingCalls {
        &self.pending
    }

    /// Procedure table this connection dispatches to.
    pub fn table(&self) -> &ProcedureTable<T> {
        &self.table
    }

    /// Active configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl<T: 'static> Drop for Connection<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: 'static> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("table", &self.table.name())
            .field("authenticated", &self.is_authenticated())
            .field("closed", &self.is_closed())
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
