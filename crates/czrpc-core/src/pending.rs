//! Registry of in-flight deferred calls.
//!
//! Each deferred call moves through three states:
//!
//! ```text
//!  register() ──▶ Issued ──retire()──▶ Retired ──next register()/drain──▶ Reclaimed
//! ```
//!
//! A call is registered under a fresh counter before its continuation is
//! attached, so a completion can always find its entry. The continuation
//! retires the entry, moving its handle to the retired list; the handle is
//! only dropped later, by the next registration or by teardown, never from
//! inside the continuation that owns it.
//!
//! The handle stored per call is the one returned by [`Deferred::then`]: it
//! resolves once the reply has been sent. Teardown closes the registry, so
//! no call can be registered afterwards, and waits on every stored handle,
//! so no continuation outlives the connection it replies on.

use std::{collections::HashMap, sync::Mutex, thread};

use czrpc_proto::Header;
use tracing::{debug, error};

use crate::{deferred::Deferred, lock};

#[derive(Default)]
struct PendingState {
    next_counter: u32,
    /// Issued calls. `None` until the continuation handle is attached, and
    /// again while teardown waits on it.
    issued: HashMap<u32, Option<Deferred<()>>>,
    /// Completed calls waiting to be dropped.
    retired: Vec<Deferred<()>>,
    /// Set by teardown; registration is refused from then on.
    closed: bool,
}

/// In-flight deferred calls of one connection.
#[derive(Default)]
pub struct PendingCalls {
    state: Mutex<PendingState>,
}

impl PendingCalls {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a counter for a new deferred call and reclaim retired ones.
    ///
    /// Returns `None` once teardown has started.
    pub(crate) fn register(&self) -> Option<u32> {
        let (counter, reclaimed) = {
            let mut state = lock(&self.state);
            if state.closed {
                debug!("refusing deferred call, connection torn down");
                return None;
            }

            let mut counter = state.next_counter;
            while state.issued.contains_key(&counter) {
                counter = (counter + 1) & Header::MAX_COUNTER;
            }
            state.next_counter = (counter + 1) & Header::MAX_COUNTER;
            state.issued.insert(counter, None);
            (counter, std::mem::take(&mut state.retired))
        };
        // Dropped outside the lock.
        drop(reclaimed);

        debug!(counter, "registered deferred call");
        Some(counter)
    }

    /// Store the continuation handle of an issued call.
    ///
    /// If the call already completed, the handle goes straight to the
    /// retired list.
    pub(crate) fn attach(&self, counter: u32, handle: Deferred<()>) {
        let mut state = lock(&self.state);
        match state.issued.get_mut(&counter) {
            Some(slot) => *slot = Some(handle),
            None => state.retired.push(handle),
        }
    }

    /// Mark an issued call as completed.
    ///
    /// Returns false if the entry is absent, which happens when the
    /// connection is being torn down. That is not an error.
    pub(crate) fn retire(&self, counter: u32) -> bool {
        let mut state = lock(&self.state);
        match state.issued.remove(&counter) {
            Some(handle) => {
                state.retired.extend(handle);
                true
            },
            None => {
                debug!(counter, "completion for absent pending call, connection shutting down");
                false
            },
        }
    }

    /// Number of issued calls.
    pub fn len(&self) -> usize {
        lock(&self.state).issued.len()
    }

    /// Check if no call is issued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completed calls not yet reclaimed.
    pub fn retired_len(&self) -> usize {
        lock(&self.state).retired.len()
    }

    /// Check if `counter` belongs to an issued call.
    pub fn contains(&self, counter: u32) -> bool {
        lock(&self.state).issued.contains_key(&counter)
    }

    /// Check if teardown has closed the registry.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Refuse further registrations, block until every issued call has
    /// completed, then reclaim everything.
    ///
    /// Handles are waited on outside the lock, since the continuations being
    /// waited for need it to retire themselves.
    pub(crate) fn drain_and_wait(&self) {
        lock(&self.state).closed = true;

        loop {
            let (handles, unattached) = {
                let mut state = lock(&self.state);
                let unattached = state.issued.values().filter(|h| h.is_none()).count();
                let handles: Vec<(u32, Deferred<()>)> = state
                    .issued
                    .iter_mut()
                    .filter_map(|(&counter, handle)| handle.take().map(|h| (counter, h)))
                    .collect();
                (handles, unattached)
            };

            if handles.is_empty() {
                if unattached == 0 {
                    break;
                }
                // A dispatch registered before the close and is about to
                // attach its handle.
                thread::yield_now();
                continue;
            }

            debug!(count = handles.len(), "waiting for deferred calls");
            for (counter, handle) in handles {
                if handle.wait().is_err() {
                    // The continuation panicked before retiring its entry.
                    debug!(counter, "deferred call continuation did not finish");
                }
                lock(&self.state).issued.remove(&counter);
            }
        }

        let leftover = {
            let mut state = lock(&self.state);
            state.retired.clear();
            let leftover = state.issued.len();
            state.issued.clear();
            leftover
        };

        if leftover != 0 {
            error!(leftover, "pending calls remain after teardown");
        }
    }
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("PendingCalls")
            .field("issued", &state.issued.len())
            .field("retired", &state.retired.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        panic::{AssertUnwindSafe, catch_unwind},
        sync::Arc,
        time::Duration,
    };

    use proptest::prelude::*;

    use super::*;
    use crate::deferred::channel;

    #[test]
    fn counters_are_fresh_and_wrap() {
        let pending = PendingCalls::new();
        lock(&pending.state).next_counter = Header::MAX_COUNTER;

        assert_eq!(pending.register(), Some(Header::MAX_COUNTER));
        assert_eq!(pending.register(), Some(0));
        assert!(pending.contains(Header::MAX_COUNTER));
        assert!(pending.contains(0));
    }

    #[test]
    fn counter_allocation_skips_issued_entries() {
        let pending = PendingCalls::new();
        let first = pending.register().unwrap();
        lock(&pending.state).next_counter = first;

        let second = pending.register().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn retire_moves_to_retired_and_next_register_reclaims() {
        let pending = PendingCalls::new();
        let counter = pending.register().unwrap();
        pending.attach(counter, Deferred::ready(()));

        assert!(pending.retire(counter));
        assert!(!pending.contains(counter));
        assert_eq!(pending.retired_len(), 1);

        pending.register().unwrap();
        assert_eq!(pending.retired_len(), 0);
    }

    #[test]
    fn completion_before_attach_is_retired_on_attach() {
        let pending = PendingCalls::new();
        let counter = pending.register().unwrap();

        assert!(pending.retire(counter));
        pending.attach(counter, Deferred::ready(()));

        assert!(pending.is_empty());
        assert_eq!(pending.retired_len(), 1);
    }

    #[test]
    fn retiring_absent_entry_is_not_fatal() {
        let pending = PendingCalls::new();
        assert!(!pending.retire(99));
    }

    #[test]
    fn drain_waits_for_outstanding_calls() {
        let pending = Arc::new(PendingCalls::new());
        let counter = pending.register().unwrap();

        let (promise, deferred) = channel::<()>();
        let registry = Arc::clone(&pending);
        pending.attach(
            counter,
            deferred.then(move |_| {
                registry.retire(counter);
            }),
        );

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            promise.complete(());
        });

        pending.drain_and_wait();
        assert!(pending.is_empty());
        assert_eq!(pending.retired_len(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn drain_waits_for_handle_attached_after_it_started() {
        let pending = Arc::new(PendingCalls::new());
        let counter = pending.register().unwrap();

        let attacher = {
            let pending = Arc::clone(&pending);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                pending.attach(counter, Deferred::ready(()));
            })
        };

        pending.drain_and_wait();
        assert!(pending.is_empty());
        attacher.join().unwrap();
    }

    #[test]
    fn registration_after_drain_is_refused() {
        let pending = PendingCalls::new();
        pending.drain_and_wait();

        assert!(pending.is_closed());
        assert_eq!(pending.register(), None);
        assert!(pending.is_empty());
    }

    #[test]
    #[allow(clippy::panic)]
    fn drain_reclaims_entry_whose_continuation_panicked() {
        let pending = PendingCalls::new();
        let counter = pending.register().unwrap();

        let (promise, deferred) = channel::<()>();
        pending.attach(counter, deferred.then(|_| panic!("reply encoding failed")));

        let completed = catch_unwind(AssertUnwindSafe(|| promise.complete(())));
        assert!(completed.is_err());
        assert!(pending.contains(counter));

        pending.drain_and_wait();
        assert!(pending.is_empty());
        assert_eq!(pending.retired_len(), 0);
    }

    proptest! {
        #[test]
        fn issued_counters_are_unique(
            start in 0..=Header::MAX_COUNTER,
            calls in 1usize..64,
            retire_mask in any::<u64>(),
        ) {
            let pending = PendingCalls::new();
            lock(&pending.state).next_counter = start;

            let mut live = HashSet::new();
            for i in 0..calls {
                let counter = pending.register().unwrap();
                prop_assert!(live.insert(counter), "counter {} issued twice", counter);
                if (retire_mask >> i) & 1 == 1 {
                    prop_assert!(pending.retire(counter));
                    live.remove(&counter);
                }
            }
            prop_assert_eq!(pending.len(), live.len());
        }
    }
}
