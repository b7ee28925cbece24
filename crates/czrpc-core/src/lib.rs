//! czrpc dispatch core
//!
//! Everything between "a frame arrived" and "a reply left": the per-type
//! procedure table, the per-connection dispatch engine, tracking of calls
//! whose result is deferred, reply formatting, and the caller-side tracker
//! that correlates replies with the requests that produced them.
//!
//! # Architecture
//!
//! ```text
//!  bytes ──▶ FrameAccumulator ──▶ Connection::dispatch_frame
//!                                   │  resolve (id or name)
//!                                   │  auth gate
//!                                   │  decode params (typed or Any)
//!                                   ▼
//!                              Handler::invoke ──▶ ready ──▶ ReplySender
//!                                   │
//!                                   └─▶ Deferred ──▶ PendingCalls ──▶ ReplySender
//! ```
//!
//! The engine runs on whatever thread hands it bytes and never blocks on a
//! deferred result. Deferred results complete on the thread that fulfils
//! them; the pending-call registry is the only state shared with those
//! threads. Closing a connection is the one blocking operation: it waits for
//! every outstanding deferred result so no completion outlives its
//! connection.
//!
//! # Components
//!
//! - [`table`]: procedure registration and lookup
//! - [`dispatch`]: per-connection dispatch engine
//! - [`pending`]: in-flight deferred call registry
//! - [`reply`]: reply frame formatting
//! - [`deferred`]: completion-callback result handles
//! - [`client`]: caller-side request building and reply correlation
//! - [`object`]: per-object properties and auth token
//! - [`transport`]: byte pipe abstraction
//! - [`config`]: connection configuration
//! - [`error`]: error types

pub mod client;
pub mod config;
pub mod deferred;
pub mod dispatch;
pub mod error;
pub mod object;
pub mod pending;
pub mod reply;
pub mod table;
pub mod transport;

pub use client::{CallTracker, Reply};
pub use config::ConnectionConfig;
pub use deferred::{Canceled, Deferred, Promise};
pub use dispatch::Connection;
pub use error::{CallError, CallFailure, DispatchError, RegistrationError};
pub use object::ObjectData;
pub use table::{ControlHandler, Handler, ProcedureTable, Session};
pub use transport::Transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
///
/// Every critical section in this crate leaves its data consistent before
/// running user code, so poisoning carries no information here.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
