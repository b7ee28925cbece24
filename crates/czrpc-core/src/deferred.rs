//! Completion-callback result handles.
//!
//! A [`Promise`]/[`Deferred`] pair is a oneshot channel carrying one value
//! from the code that produces it to the code that consumes it. The consumer
//! either attaches a single continuation with [`Deferred::then`] or
//! [`Deferred::map`], or blocks with [`Deferred::wait`]. Both consume the
//! handle, so a result is observed exactly once.
//!
//! Continuations run on the thread that calls [`Promise::complete`], or
//! inline in `then`/`map` when the value is already available. There is no
//! executor: the continuation future is polled from its own waker, and the
//! oneshot sender wakes the receiver on the completing thread. Dropping a
//! promise without completing it resolves the deferred side with
//! [`Canceled`].
//!
//! `then` returns a new handle that resolves after the continuation has
//! returned. Waiting on that handle is how connection teardown makes sure no
//! continuation is still running against a connection being destroyed.

use std::{
    sync::{Arc, Mutex},
    task::Context,
};

use futures::{
    FutureExt,
    future::BoxFuture,
    task::{ArcWake, waker_ref},
};
use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::lock;

/// The promise was dropped before producing a value.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("deferred result was dropped before completion")]
pub struct Canceled;

/// Create a connected promise/deferred pair.
pub fn channel<T>() -> (Promise<T>, Deferred<T>) {
    let (tx, rx) = oneshot::channel();
    (Promise { tx }, Deferred { state: State::Pending(rx) })
}

/// Producer side of a deferred result.
#[derive(Debug)]
pub struct Promise<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Promise<T> {
    /// Resolve with `value`, running the attached continuation (if any) on
    /// this thread.
    pub fn complete(self, value: T) {
        // The receiving side may be gone; the value is dropped with it.
        let _ = self.tx.send(value);
    }

    /// Check if the deferred side was dropped.
    pub fn is_canceled(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
enum State<T> {
    Pending(oneshot::Receiver<T>),
    Resolved(Result<T, Canceled>),
}

/// Consumer side of a value that becomes available later.
#[derive(Debug)]
pub struct Deferred<T> {
    state: State<T>,
}

impl<T: Send + 'static> Deferred<T> {
    /// A deferred that is already resolved with `value`.
    pub fn ready(value: T) -> Self {
        Self { state: State::Resolved(Ok(value)) }
    }

    /// Check if the value (or cancellation) is available.
    pub fn is_ready(&mut self) -> bool {
        if let State::Pending(rx) = &mut self.state {
            match rx.try_recv() {
                Ok(value) => self.state = State::Resolved(Ok(value)),
                Err(TryRecvError::Closed) => self.state = State::Resolved(Err(Canceled)),
                Err(TryRecvError::Empty) => return false,
            }
        }
        true
    }

    /// Attach a continuation that receives the outcome.
    ///
    /// The returned handle resolves with the continuation's return value
    /// once it has run. If the continuation panics, it resolves with
    /// [`Canceled`].
    pub fn then<U, F>(self, f: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(Result<T, Canceled>) -> U + Send + 'static,
    {
        let (promise, deferred) = channel();
        self.on_resolve(move |outcome| promise.complete(f(outcome)));
        deferred
    }

    /// Transform the value, propagating cancellation.
    pub fn map<U, F>(self, f: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (promise, deferred) = channel();
        self.on_resolve(move |outcome| {
            if let Ok(value) = outcome {
                promise.complete(f(value));
            }
        });
        deferred
    }

    /// Block until the outcome is available.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<T, Canceled> {
        match self.state {
            State::Resolved(outcome) => outcome,
            State::Pending(rx) => rx.blocking_recv().map_err(|_| Canceled),
        }
    }

    fn on_resolve<F>(self, continuation: F)
    where
        F: FnOnce(Result<T, Canceled>) + Send + 'static,
    {
        match self.state {
            State::Resolved(outcome) => continuation(outcome),
            State::Pending(rx) => {
                Inline::run(rx.map(move |outcome| continuation(outcome.map_err(|_| Canceled))).boxed());
            },
        }
    }
}

/// A continuation future polled by whichever thread wakes it.
struct Inline {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
}

impl Inline {
    fn run(future: BoxFuture<'static, ()>) {
        let task = Arc::new(Self { future: Mutex::new(Some(future)) });
        task.poll();
    }

    fn poll(self: &Arc<Self>) {
        let mut slot = lock(&self.future);
        let Some(mut future) = slot.take() else {
            return;
        };

        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        if future.as_mut().poll(&mut cx).is_pending() {
            *slot = Some(future);
        }
    }
}

impl ArcWake for Inline {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.poll();
    }
}
