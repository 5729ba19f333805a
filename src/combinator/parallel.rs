//! Parallel fan-out with first-failure cancellation.

use crate::activation::{Activation, Step};
use crate::cancel::{Cancelled, LinkedSource};
use crate::computation::{Computation, Value};
use crate::context::{self, SyncContext};
use crate::fault::Fault;
use crate::gate::Latch;
use crate::run::queue_computation;
use crate::tracing_compat::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

enum FirstFailure {
    Faulted(Fault),
    Cancelled(Cancelled),
}

struct ParallelState<T> {
    results: Mutex<Vec<Option<T>>>,
    remaining: AtomicUsize,
    failure_latch: Latch,
    failure: Mutex<Option<FirstFailure>>,
    linked: LinkedSource,
    captured_context: Option<Arc<dyn SyncContext>>,
    outer: Activation<Vec<T>>,
}

impl<T: Value> ParallelState<T> {
    /// Records the first failure and cancels the sub-source before the
    /// recording child decrements, so no sibling can complete-success in
    /// between.
    fn record_failure(&self, failure: FirstFailure) {
        if self.failure_latch.enter() {
            *self.failure.lock() = Some(failure);
            self.linked.cancel();
        }
    }

    fn complete_one(state: &Arc<Self>) {
        if state.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let holder = state.outer.holder().clone();
        let state = Arc::clone(state);
        let context = state.captured_context.clone();
        holder.post_or_queue_with_trampoline(&context, move || {
            match state.failure.lock().take() {
                Some(FirstFailure::Faulted(fault)) => state.outer.fail(fault),
                Some(FirstFailure::Cancelled(cancelled)) => state.outer.deliver_cancel(cancelled),
                None => {
                    let values: Vec<T> = state
                        .results
                        .lock()
                        .iter_mut()
                        .map(|slot| slot.take().expect("every parallel child delivers once"))
                        .collect();
                    state.outer.succeed(values)
                }
            }
        });
    }
}

/// Runs the computations concurrently on the worker pool and yields their
/// results in index order.
///
/// The first child to fail (fault or cancellation) cancels the rest
/// through a linked sub-source; the combinator then delivers that first
/// failure. An empty input yields an empty vector immediately.
pub fn parallel<T, I>(computations: I) -> Computation<Vec<T>>
where
    T: Value,
    I: IntoIterator<Item = Computation<T>>,
{
    let computations: Arc<Vec<Computation<T>>> = Arc::new(computations.into_iter().collect());
    Computation::new(move |ctxt: Activation<Vec<T>>| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let count = computations.len();
        if count == 0 {
            return ctxt.succeed(Vec::new());
        }
        debug!(children = count, "parallel fan-out");
        let state = Arc::new(ParallelState {
            results: Mutex::new((0..count).map(|_| None).collect()),
            remaining: AtomicUsize::new(count),
            failure_latch: Latch::new(),
            failure: Mutex::new(None),
            linked: LinkedSource::new(ctxt.token()),
            captured_context: context::current(),
            outer: ctxt.clone(),
        });
        for (index, computation) in computations.iter().enumerate() {
            let on_ok = Arc::clone(&state);
            let on_fault = Arc::clone(&state);
            let on_cancel = Arc::clone(&state);
            queue_computation(
                state.linked.token(),
                computation,
                Arc::new(move |value: T| {
                    on_ok.results.lock()[index] = Some(value);
                    ParallelState::complete_one(&on_ok);
                    Step::done()
                }),
                Arc::new(move |fault: Fault| {
                    on_fault.record_failure(FirstFailure::Faulted(fault));
                    ParallelState::complete_one(&on_fault);
                    Step::done()
                }),
                Arc::new(move |cancelled: Cancelled| {
                    on_cancel.record_failure(FirstFailure::Cancelled(cancelled));
                    ParallelState::complete_one(&on_cancel);
                    Step::done()
                }),
            );
        }
        Step::done()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelSource, CancelToken};
    use crate::ops;
    use crate::run::run_synchronously;
    use std::sync::atomic::AtomicU32;
    use std::thread;
    use std::time::Duration;

    fn token() -> CancelToken {
        CancelSource::new().token()
    }

    #[test]
    fn empty_input_yields_empty_vec() {
        let comp = parallel(Vec::<Computation<i32>>::new());
        assert_eq!(
            run_synchronously(&comp, None, Some(token())).expect("ok"),
            Vec::<i32>::new()
        );
    }

    #[test]
    fn results_are_in_index_order() {
        // Later children finish first; order must still follow the index.
        let children: Vec<Computation<u64>> = (0..8u64)
            .map(|i| {
                ops::delay(move || {
                    thread::sleep(Duration::from_millis(8 - i));
                    ops::pure(i)
                })
            })
            .collect();
        let comp = parallel(children);
        let results = run_synchronously(&comp, None, Some(token())).expect("ok");
        assert_eq!(results, (0..8u64).collect::<Vec<_>>());
    }

    #[test]
    fn first_failure_cancels_siblings() {
        let cancelled_children = Arc::new(AtomicU32::new(0));
        let mut children = Vec::new();
        children.push(ops::delay(|| ops::raise::<u32>(Fault::new("first failure"))));
        for _ in 0..4 {
            let counter = Arc::clone(&cancelled_children);
            // A sibling that loops until it observes cancellation.
            children.push(ops::try_cancelled(
                ops::while_loop(
                    || true,
                    ops::delay(|| {
                        thread::sleep(Duration::from_millis(1));
                        ops::zero()
                    }),
                )
                .and_then(|()| ops::pure(0u32)),
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            ));
        }
        let comp = parallel(children);
        let err = run_synchronously(&comp, None, Some(token())).expect_err("fails");
        assert_eq!(err.fault().expect("fault").message(), "first failure");

        // Siblings observe cancellation within bounded time.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cancelled_children.load(Ordering::SeqCst) < 4
            && std::time::Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(cancelled_children.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn parent_cancellation_reaches_children() {
        let source = CancelSource::new();
        let comp = parallel(vec![
            ops::while_loop(
                || true,
                ops::delay(|| {
                    thread::sleep(Duration::from_millis(1));
                    ops::zero()
                }),
            ),
            ops::zero(),
        ]);
        let t = source.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            t.cancel();
        });
        let err = run_synchronously(&comp, None, Some(source.token())).expect_err("cancelled");
        assert!(err.is_cancelled());
        canceller.join().expect("canceller panicked");
    }
}
