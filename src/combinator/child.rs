//! Child computations with linked cancellation.

use crate::activation::Step;
use crate::cancel::{Cancelled, LinkedSource};
use crate::cell::ResultCell;
use crate::computation::{Computation, Value};
use crate::error::Elapsed;
use crate::fault::Fault;
use crate::outcome::AsyncOutcome;
use crate::run::{await_outcome, queue_computation};
use crate::timer;
use crate::tracing_compat::debug;
use std::sync::Arc;
use std::time::Duration;

/// Eagerly starts `computation` as a child of the current computation and
/// yields a computation that awaits its result.
///
/// The child runs under a sub-source linked to the caller's token, so
/// cancelling the parent cancels the child. With a timeout, a timer
/// cancels the child and the awaiting computation receives a timeout
/// fault; the first of {completion, timeout} wins the child's result
/// cell.
pub fn start_child<T: Value + Clone>(
    computation: &Computation<T>,
    timeout: Option<Duration>,
) -> Computation<Computation<T>> {
    let computation = computation.clone();
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let cell: ResultCell<AsyncOutcome<T>> = ResultCell::new();
        let linked = Arc::new(LinkedSource::new(ctxt.token()));

        let timer_key = timeout.map(|timeout| {
            let cell = cell.clone();
            let linked = Arc::clone(&linked);
            timer::schedule(timeout, move || {
                debug!("child computation timed out");
                linked.cancel();
                cell.register_result(
                    AsyncOutcome::Faulted(Fault::with_source(
                        "child computation timed out",
                        Elapsed::new(timeout),
                    )),
                    false,
                );
            })
        });

        let on_ok = (cell.clone(), timer_key.clone(), Arc::clone(&linked));
        let on_fault = (cell.clone(), timer_key.clone(), Arc::clone(&linked));
        let on_cancel = (cell.clone(), timer_key.clone(), Arc::clone(&linked));
        queue_computation(
            linked.token(),
            &computation,
            Arc::new(move |value: T| {
                if let Some(key) = &on_ok.1 {
                    key.cancel();
                }
                on_ok.0.register_result(AsyncOutcome::Ok(value), false);
                Step::done()
            }),
            Arc::new(move |fault: Fault| {
                if let Some(key) = &on_fault.1 {
                    key.cancel();
                }
                on_fault.0.register_result(AsyncOutcome::Faulted(fault), false);
                Step::done()
            }),
            Arc::new(move |cancelled: Cancelled| {
                if let Some(key) = &on_cancel.1 {
                    key.cancel();
                }
                on_cancel
                    .0
                    .register_result(AsyncOutcome::Cancelled(cancelled), false);
                Step::done()
            }),
        );

        ctxt.succeed(await_outcome(&cell, false))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelSource, CancelToken};
    use crate::ops;
    use crate::run::run_synchronously;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Instant;

    fn token() -> CancelToken {
        CancelSource::new().token()
    }

    fn slow_value(delay_ms: u64, value: u32) -> Computation<u32> {
        ops::delay(move || {
            thread::sleep(Duration::from_millis(delay_ms));
            ops::pure(value)
        })
    }

    #[test]
    fn child_runs_concurrently_with_parent() {
        // Two 40ms children awaited sequentially still finish in ~40ms
        // because both start eagerly.
        let comp = ops::bind(start_child(&slow_value(40, 1), None), |await_first| {
            ops::bind(start_child(&slow_value(40, 2), None), move |await_second| {
                let await_first = await_first.clone();
                ops::bind(await_first, move |a| {
                    let await_second = await_second.clone();
                    ops::bind(await_second, move |b| ops::pure(a + b))
                })
            })
        });
        let start = Instant::now();
        assert_eq!(run_synchronously(&comp, None, Some(token())).expect("ok"), 3);
        assert!(start.elapsed() < Duration::from_millis(120));
    }

    #[test]
    fn child_timeout_faults_the_await() {
        let comp = ops::bind(
            start_child(&slow_value(5_000, 1), Some(Duration::from_millis(40))),
            |awaiting| awaiting,
        );
        let start = Instant::now();
        let err = run_synchronously(&comp, None, Some(token())).expect_err("times out");
        assert!(err.fault().expect("fault").message().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn parent_cancellation_reaches_the_child() {
        let observed = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&observed);
        let child = ops::try_cancelled(
            ops::while_loop(
                || true,
                ops::delay(|| {
                    thread::sleep(Duration::from_millis(1));
                    ops::zero()
                }),
            ),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        let source = CancelSource::new();
        let comp = ops::bind(start_child(&child, None), |awaiting| awaiting);
        let cancel_source = source.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            cancel_source.cancel();
        });
        let err = run_synchronously(&comp, None, Some(source.token())).expect_err("cancelled");
        assert!(err.is_cancelled());
        canceller.join().expect("canceller panicked");

        let deadline = Instant::now() + Duration::from_secs(5);
        while observed.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}
