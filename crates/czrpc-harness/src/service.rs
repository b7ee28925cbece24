//! Sample service used by tests and scenarios.
//!
//! `Calculator` covers every handler shape: synchronous procedures that
//! succeed, fail or panic, a deferred procedure whose results the test
//! completes by hand, and a deferred procedure completed by a worker thread.

use std::{
    sync::{Mutex, PoisonError},
    thread,
    time::Duration,
};

use czrpc_core::{
    CallError, Deferred, Handler, ProcedureTable, Promise, RegistrationError, deferred::channel,
};
use czrpc_proto::Any;
use tracing::debug;

type Parked = Promise<Result<i32, CallError>>;

/// Procedure ids of [`calculator_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CalculatorRpc {
    /// `add(a: i32, b: i32) -> i32`
    Add = 1,
    /// `divide(a: i32, b: i32) -> i32`, fails on zero
    Divide = 2,
    /// `echo(text: String) -> String`
    Echo = 3,
    /// `queued_square(n: i32) -> i32`, deferred until completed by the test
    QueuedSquare = 4,
    /// `delayed_double(n: i32, delay_ms: u32) -> i32`, deferred on a thread
    DelayedDouble = 5,
    /// `explode()`, always panics
    Explode = 6,
    /// `describe(value: Any) -> String`
    Describe = 7,
}

impl CalculatorRpc {
    /// Wire id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Registered name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Divide => "divide",
            Self::Echo => "echo",
            Self::QueuedSquare => "queued_square",
            Self::DelayedDouble => "delayed_double",
            Self::Explode => "explode",
            Self::Describe => "describe",
        }
    }
}

/// Served object with hand-completed deferred results.
#[derive(Debug, Default)]
pub struct Calculator {
    queued: Mutex<Vec<(i32, Parked)>>,
}

impl Calculator {
    /// Calculator with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `queued_square` calls waiting for completion.
    pub fn queued_len(&self) -> usize {
        self.queue().len()
    }

    /// Inputs of the waiting `queued_square` calls, in call order.
    pub fn queued_inputs(&self) -> Vec<i32> {
        self.queue().iter().map(|(n, _)| *n).collect()
    }

    /// Complete the oldest waiting `queued_square(n)` call.
    ///
    /// Returns false if no call with that input is waiting.
    pub fn complete_queued(&self, n: i32) -> bool {
        let promise = {
            let mut queue = self.queue();
            let Some(index) = queue.iter().position(|(input, _)| *input == n) else {
                return false;
            };
            queue.remove(index).1
        };
        // Completing runs the reply continuation; do it outside the lock.
        promise.complete(Ok(n.wrapping_mul(n)));
        true
    }

    /// Drop every waiting promise without completing it.
    pub fn abandon_queued(&self) {
        let abandoned = std::mem::take(&mut *self.queue());
        drop(abandoned);
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, Vec<(i32, Parked)>> {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_square(&self, n: i32) -> Deferred<Result<i32, CallError>> {
        let (promise, result) = channel();
        self.queue().push((n, promise));
        debug!(n, "queued square");
        result
    }
}

fn delayed_double(n: i32, delay_ms: u32) -> Deferred<Result<i32, CallError>> {
    let (promise, result) = channel();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(u64::from(delay_ms)));
        promise.complete(n.checked_mul(2).ok_or_else(|| CallError::new("Overflow")));
    });
    result
}

#[allow(clippy::panic)]
fn explode(_: &Calculator, (): ()) -> Result<(), CallError> {
    panic!("calculator exploded")
}

/// Procedure table for [`Calculator`], ids as in [`CalculatorRpc`].
pub fn calculator_table() -> Result<ProcedureTable<Calculator>, RegistrationError> {
    let mut table = ProcedureTable::new("Calculator");
    table.register_generic_entry()?;

    table.register_procedure(
        CalculatorRpc::Add.id(),
        CalculatorRpc::Add.name(),
        Handler::sync(|_: &Calculator, (a, b): (i32, i32)| {
            a.checked_add(b).ok_or_else(|| CallError::new("Overflow"))
        }),
    )?;
    table.register_procedure(
        CalculatorRpc::Divide.id(),
        CalculatorRpc::Divide.name(),
        Handler::sync(|_: &Calculator, (a, b): (i32, i32)| {
            if b == 0 {
                return Err(CallError::new("Division by zero"));
            }
            a.checked_div(b).ok_or_else(|| CallError::new("Overflow"))
        }),
    )?;
    table.register_procedure(
        CalculatorRpc::Echo.id(),
        CalculatorRpc::Echo.name(),
        Handler::sync(|_: &Calculator, (text,): (String,)| Ok(text)),
    )?;
    table.register_procedure(
        CalculatorRpc::QueuedSquare.id(),
        CalculatorRpc::QueuedSquare.name(),
        Handler::deferred(|calc: &Calculator, (n,): (i32,)| calc.queue_square(n)),
    )?;
    table.register_procedure(
        CalculatorRpc::DelayedDouble.id(),
        CalculatorRpc::DelayedDouble.name(),
        Handler::deferred(|_: &Calculator, (n, delay_ms): (i32, u32)| delayed_double(n, delay_ms)),
    )?;
    table.register_procedure(
        CalculatorRpc::Explode.id(),
        CalculatorRpc::Explode.name(),
        Handler::sync(explode),
    )?;
    table.register_procedure(
        CalculatorRpc::Describe.id(),
        CalculatorRpc::Describe.name(),
        Handler::sync(|_: &Calculator, (value,): (Any,)| {
            Ok(format!("{}: {value}", value.kind()))
        }),
    )?;

    Ok(table)
}
