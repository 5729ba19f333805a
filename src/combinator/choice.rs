//! Selective choice: first non-empty success wins.

use crate::activation::{Activation, Step};
use crate::cancel::{Cancelled, LinkedSource};
use crate::computation::{Computation, Value};
use crate::context::{self, SyncContext};
use crate::fault::Fault;
use crate::gate::Latch;
use crate::outcome::AsyncOutcome;
use crate::run::queue_computation;
use crate::tracing_compat::debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct ChoiceState<T> {
    settled: Latch,
    nones: AtomicUsize,
    count: usize,
    linked: LinkedSource,
    captured_context: Option<Arc<dyn SyncContext>>,
    outer: Activation<Option<T>>,
}

impl<T: Value> ChoiceState<T> {
    /// Settles the choice exactly once; losers are cancelled when any
    /// remain in flight.
    fn settle(state: &Arc<Self>, outcome: AsyncOutcome<Option<T>>, cancel_losers: bool) {
        if !state.settled.enter() {
            return;
        }
        if cancel_losers {
            state.linked.cancel();
        }
        let holder = state.outer.holder().clone();
        let state = Arc::clone(state);
        let context = state.captured_context.clone();
        holder.post_or_queue_with_trampoline(&context, move || state.outer.deliver(outcome));
    }
}

/// Runs the computations concurrently; the first to produce `Some` wins
/// and the rest are cancelled.
///
/// If every child produces `None`, the last `None` triggers a single
/// `None` delivery. The first fault or cancellation from any child also
/// settles the choice with that outcome. An empty input yields `None`.
pub fn choice<T, I>(computations: I) -> Computation<Option<T>>
where
    T: Value,
    I: IntoIterator<Item = Computation<Option<T>>>,
{
    let computations: Arc<Vec<Computation<Option<T>>>> =
        Arc::new(computations.into_iter().collect());
    Computation::new(move |ctxt: Activation<Option<T>>| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let count = computations.len();
        if count == 0 {
            return ctxt.succeed(None);
        }
        debug!(children = count, "choice fan-out");
        let state = Arc::new(ChoiceState {
            settled: Latch::new(),
            nones: AtomicUsize::new(0),
            count,
            linked: LinkedSource::new(ctxt.token()),
            captured_context: context::current(),
            outer: ctxt.clone(),
        });
        for computation in computations.iter() {
            let on_ok = Arc::clone(&state);
            let on_fault = Arc::clone(&state);
            let on_cancel = Arc::clone(&state);
            queue_computation(
                state.linked.token(),
                computation,
                Arc::new(move |value: Option<T>| {
                    match value {
                        Some(value) => ChoiceState::settle(&on_ok, AsyncOutcome::Ok(Some(value)), true),
                        None => {
                            // The Nth None delivers; earlier ones only count.
                            if on_ok.nones.fetch_add(1, Ordering::AcqRel) + 1 == on_ok.count {
                                ChoiceState::settle(&on_ok, AsyncOutcome::Ok(None), false);
                            }
                        }
                    }
                    Step::done()
                }),
                Arc::new(move |fault: Fault| {
                    ChoiceState::settle(&on_fault, AsyncOutcome::Faulted(fault), true);
                    Step::done()
                }),
                Arc::new(move |cancelled: Cancelled| {
                    ChoiceState::settle(&on_cancel, AsyncOutcome::Cancelled(cancelled), true);
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
    use std::time::Duration;

    fn token() -> CancelToken {
        CancelSource::new().token()
    }

    fn eventually(delay_ms: u64, value: Option<u32>) -> Computation<Option<u32>> {
        // Timer-based, so a waiting child never holds a pool worker.
        ops::bind(
            crate::bridge::sleep::sleep(Duration::from_millis(delay_ms)),
            move |()| ops::pure(value),
        )
    }

    #[test]
    fn empty_input_yields_none() {
        let comp = choice(Vec::<Computation<Option<u32>>>::new());
        assert_eq!(run_synchronously(&comp, None, Some(token())).expect("ok"), None);
    }

    #[test]
    fn first_some_wins() {
        let comp = choice(vec![
            eventually(50, None),
            eventually(10, Some(7)),
            eventually(100, Some(9)),
        ]);
        let start = std::time::Instant::now();
        assert_eq!(
            run_synchronously(&comp, None, Some(token())).expect("ok"),
            Some(7)
        );
        // The winner settles long before the slowest child would finish.
        assert!(start.elapsed() < Duration::from_millis(90));
    }

    #[test]
    fn all_none_yields_none_once() {
        let comp = choice(vec![eventually(5, None), eventually(10, None), eventually(1, None)]);
        assert_eq!(run_synchronously(&comp, None, Some(token())).expect("ok"), None);
    }

    #[test]
    fn child_fault_settles_the_choice() {
        let comp = choice(vec![
            eventually(100, Some(1)),
            ops::delay(|| ops::raise::<Option<u32>>(Fault::new("child broke"))),
        ]);
        let err = run_synchronously(&comp, None, Some(token())).expect_err("faults");
        assert_eq!(err.fault().expect("fault").message(), "child broke");
    }
}
