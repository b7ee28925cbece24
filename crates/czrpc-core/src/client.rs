//! Caller-side request building and reply correlation.
//!
//! [`CallTracker`] writes request frames to a transport and resolves the
//! matching [`Reply`] handle when the reply frame comes back. Replies are
//! matched on [`Header::key`], never on arrival order, so a peer may answer
//! deferred calls in any order.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use bytes::Bytes;
use czrpc_proto::{Any, DebugInfo, Frame, FrameAccumulator, FrameBuilder, Header, payload};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, trace, warn};

use crate::{
    config::ConnectionConfig,
    deferred::{Canceled, Deferred, Promise, channel},
    error::{CallFailure, DispatchError},
    lock,
    transport::Transport,
};

/// Handle to the eventual result of a call.
pub type Reply<R> = Deferred<Result<R, CallFailure>>;

type RawReply = Result<Bytes, CallFailure>;

/// Issues calls over one transport and matches replies to them.
pub struct CallTracker {
    transport: Arc<dyn Transport>,
    next_counter: AtomicU32,
    pending: Mutex<HashMap<u32, Promise<RawReply>>>,
    accumulator: Mutex<FrameAccumulator>,
    config: ConnectionConfig,
}

impl CallTracker {
    /// Tracker writing requests to `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ConnectionConfig::default())
    }

    /// Tracker with explicit configuration.
    pub fn with_config(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        Self {
            transport,
            next_counter: AtomicU32::new(0),
            pending: Mutex::new(HashMap::new()),
            accumulator: Mutex::new(FrameAccumulator::new(config.max_frame_size)),
            config,
        }
    }

    /// Call procedure `rpc_id` with a typed parameter tuple.
    ///
    /// # Errors
    ///
    /// `Protocol` if `rpc_id` does not fit the 7-bit id field or the
    /// parameters fail to encode, `Transport` if the request cannot be sent.
    #[track_caller]
    pub fn call<P, R>(&self, rpc_id: u8, params: &P) -> Result<Reply<R>, CallFailure>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let debug = if self.config.trace_calls { Some(DebugInfo::here()) } else { None };
        let header = Header::try_request(self.next_counter(), rpc_id)?;

        let mut builder = FrameBuilder::new(header, debug.as_ref());
        builder.write(params)?;

        let raw = self.send(header, builder.finish()?)?;
        Ok(raw.map(|reply| reply.and_then(|bytes| decode_value::<R>(&bytes))))
    }

    /// Call a procedure by name with dynamically-typed parameters.
    ///
    /// Works for both ordinary and control procedures.
    ///
    /// # Errors
    ///
    /// `Protocol` if the request fails to encode, `Transport` if it cannot
    /// be sent.
    #[track_caller]
    pub fn call_generic(&self, name: &str, params: Vec<Any>) -> Result<Reply<Any>, CallFailure> {
        let debug = if self.config.trace_calls { Some(DebugInfo::here()) } else { None };
        let header = Header::request(self.next_counter(), Header::GENERIC_RPC_ID);

        let mut builder = FrameBuilder::new(header, debug.as_ref());
        builder.write(name)?;
        builder.write(&params)?;

        let raw = self.send(header, builder.finish()?)?;
        Ok(raw.map(|reply| reply.and_then(|bytes| decode_value::<Any>(&bytes))))
    }

    fn next_counter(&self) -> u32 {
        self.next_counter.fetch_add(1, Ordering::Relaxed) & Header::MAX_COUNTER
    }

    fn send(&self, header: Header, frame: Bytes) -> Result<Deferred<RawReply>, CallFailure> {
        let (promise, reply) = channel();
        let key = header.key();

        if lock(&self.pending).insert(key, promise).is_some() {
            // Counter wrapped onto a call that never got its reply.
            warn!(key, "correlation key reused while a call was still pending");
        }

        trace!(counter = header.counter(), rpc_id = header.rpc_id(), len = frame.len(), "sending request");
        if let Err(err) = self.transport.send(frame) {
            let promise = lock(&self.pending).remove(&key);
            drop(promise);
            return Err(CallFailure::Transport(err.to_string()));
        }

        Ok(reply.then(|outcome: Result<RawReply, Canceled>| {
            outcome.unwrap_or(Err(CallFailure::Canceled))
        }))
    }

    /// Feed bytes read from the transport and resolve every completed call.
    ///
    /// # Errors
    ///
    /// `Protocol` for undecodable input and `UnexpectedFrame` for a request
    /// frame. The transport is closed and outstanding calls fail with
    /// [`CallFailure::Disconnected`].
    pub fn receive(&self, bytes: &[u8]) -> Result<(), DispatchError> {
        let frames = match lock(&self.accumulator).feed(bytes) {
            Ok(frames) => frames,
            Err(err) => return Err(self.fail(err.into())),
        };

        for frame in frames {
            self.on_reply(frame)?;
        }
        Ok(())
    }

    /// Resolve the call a reply frame belongs to.
    ///
    /// Replies with no matching call are logged and dropped.
    ///
    /// # Errors
    ///
    /// `UnexpectedFrame` if `frame` is a request.
    pub fn on_reply(&self, frame: Frame) -> Result<(), DispatchError> {
        let header = frame.header;
        if !header.is_reply() {
            return Err(self.fail(DispatchError::UnexpectedFrame { kind: "request", key: header.key() }));
        }

        let Some(promise) = lock(&self.pending).remove(&header.key()) else {
            warn!(counter = header.counter(), rpc_id = header.rpc_id(), "reply for unknown call");
            return Ok(());
        };

        let outcome = if header.is_success() {
            Ok(frame.payload)
        } else {
            Err(decode_value::<String>(&frame.payload)
                .map_or_else(|failure| failure, CallFailure::Remote))
        };

        debug!(counter = header.counter(), success = header.is_success(), "resolved call");
        promise.complete(outcome);
        Ok(())
    }

    /// Fail every outstanding call with [`CallFailure::Disconnected`].
    ///
    /// Call it from the transport's disconnect notification.
    pub fn abort_all(&self) {
        let drained: Vec<_> = lock(&self.pending).drain().map(|(_, promise)| promise).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "aborting outstanding calls");
        }
        for promise in drained {
            promise.complete(Err(CallFailure::Disconnected));
        }
    }

    /// Number of calls waiting for a reply.
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    fn fail(&self, err: DispatchError) -> DispatchError {
        warn!(%err, "closing caller connection");
        self.transport.close();
        self.abort_all();
        err
    }
}

impl std::fmt::Debug for CallTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallTracker").field("pending", &self.pending_len()).finish_non_exhaustive()
    }
}

fn decode_value<R: DeserializeOwned>(bytes: &[u8]) -> Result<R, CallFailure> {
    let mut input = bytes;
    Ok(payload::read(&mut input)?)
}
