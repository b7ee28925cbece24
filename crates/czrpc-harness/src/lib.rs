//! Test harness for czrpc.
//!
//! In-memory transports, a loopback that wires a [`czrpc_core::CallTracker`]
//! to a [`czrpc_core::Connection`], a sample service, and seeded scenarios
//! that complete deferred calls in a reproducible random order.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod loopback;
pub mod scenario;
pub mod service;
pub mod transport;

pub use loopback::Loopback;
pub use scenario::{DeferredScenario, ScenarioOutcome};
pub use service::{Calculator, CalculatorRpc, calculator_table};
pub use transport::RecordingTransport;

use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
