//! Seeded out-of-order completion scenarios.
//!
//! A scenario issues a batch of deferred `queued_square` calls, completes
//! them in an order drawn from a seeded RNG, and checks that every caller got
//! the square of its own input. Re-running with the same seed reproduces the
//! same completion order.

use std::sync::Arc;

use czrpc_core::{ObjectData, Reply};
use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::{
    loopback::Loopback,
    service::{Calculator, CalculatorRpc, calculator_table},
};

/// What a completed scenario observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOutcome {
    /// Inputs in the order their results were completed.
    pub completion_order: Vec<i32>,
    /// Result received by each caller, in call order.
    pub results: Vec<i32>,
    /// Replies delivered to the caller.
    pub replies_delivered: usize,
}

/// Builder for a deferred-completion scenario.
#[derive(Debug, Clone)]
pub struct DeferredScenario {
    calls: usize,
    seed: u64,
}

impl DeferredScenario {
    /// Scenario with `calls` concurrent deferred calls and seed 0.
    pub fn new(calls: usize) -> Self {
        Self { calls, seed: 0 }
    }

    /// Use `seed` for the completion order.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Run the scenario.
    ///
    /// # Errors
    ///
    /// Describes the first deviation: a failed call, a reply sent before its
    /// completion, a mismatched result, or a leftover pending entry.
    pub fn run(self) -> Result<ScenarioOutcome, String> {
        let table = Arc::new(calculator_table().map_err(|e| e.to_string())?);
        let calc = Arc::new(Calculator::new());
        let loopback = Loopback::new(table, Arc::clone(&calc), Arc::new(ObjectData::new()));

        if !loopback.authenticate("").map_err(|e| e.to_string())? {
            return Err("authentication rejected".into());
        }

        let inputs: Vec<i32> = (0..self.calls).map(|i| i as i32 + 1).collect();
        let mut replies = inputs
            .iter()
            .map(|&n| {
                loopback.client().call::<_, i32>(CalculatorRpc::QueuedSquare.id(), &(n,))
            })
            .collect::<Result<Vec<Reply<i32>>, _>>()
            .map_err(|e| e.to_string())?;

        loopback.pump().map_err(|e| e.to_string())?;
        if loopback.server().pending_calls().len() != self.calls {
            return Err(format!(
                "expected {} pending calls, found {}",
                self.calls,
                loopback.server().pending_calls().len()
            ));
        }
        if replies.iter_mut().any(|reply| reply.is_ready()) {
            return Err("reply delivered before completion".into());
        }

        let mut completion_order = inputs.clone();
        completion_order.shuffle(&mut ChaCha8Rng::seed_from_u64(self.seed));

        let mut replies_delivered = 0;
        for &n in &completion_order {
            if !calc.complete_queued(n) {
                return Err(format!("no queued call for input {n}"));
            }
            replies_delivered += loopback.pump().map_err(|e| e.to_string())?;
        }

        let mut results = Vec::with_capacity(replies.len());
        for (n, reply) in inputs.iter().zip(replies) {
            let value = reply
                .wait()
                .map_err(|e| e.to_string())?
                .map_err(|e| format!("call for {n} failed: {e}"))?;
            if value != n * n {
                return Err(format!("call for {n} got {value}"));
            }
            results.push(value);
        }

        if !loopback.server().pending_calls().is_empty() {
            return Err("pending calls left after completion".into());
        }

        info!(seed = self.seed, calls = self.calls, "scenario passed");
        Ok(ScenarioOutcome { completion_order, results, replies_delivered })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_order() {
        let a = DeferredScenario::new(6).with_seed(7).run().unwrap();
        let b = DeferredScenario::new(6).with_seed(7).run().unwrap();
        assert_eq!(a.completion_order, b.completion_order);
        assert_eq!(a.results, vec![1, 4, 9, 16, 25, 36]);
        assert_eq!(a.replies_delivered, 6);
    }
}
