//! Begin/end I/O interop.
//!
//! [`from_begin_end`] consumes a begin/end pair: `begin` starts an
//! operation and returns a pending handle, invoking a completion callback
//! when the operation finishes; `end` extracts the outcome from the
//! handle (blocking until present if needed). [`as_begin_end`] produces
//! such a pair from a computation, and the two compose to the identity on
//! success, fault, and cancellation outcomes.

use crate::activation::Step;
use crate::cancel::{CancelSource, Registration};
use crate::cell::ResultCell;
use crate::computation::{Computation, Value};
use crate::context;
use crate::fault::Fault;
use crate::gate::{Latch, ManualResetGate};
use crate::outcome::AsyncOutcome;
use crate::run::start_with_continuations;
use crate::{activation::protect, cancel::Cancelled};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The ambient asynchronous-result contract of a begin/end operation.
pub trait IoPending: Send + Sync + 'static {
    /// Returns `true` once the operation's outcome is available.
    fn is_completed(&self) -> bool;
    /// Returns `true` if the operation completed before `begin` returned.
    fn completed_synchronously(&self) -> bool;
    /// A gate signalled when the outcome becomes available.
    fn wait_gate(&self) -> Arc<ManualResetGate>;
}

/// Completion callback handed to a `begin` function.
pub type IoCallback<P> = Box<dyn FnOnce(&Arc<P>) + Send>;

/// Builds a computation around a begin/end pair.
///
/// `begin` receives a completion callback and returns the pending handle;
/// `end` turns the completed handle into an outcome and may block until
/// the outcome is present. If the handle reports synchronous completion,
/// `end` runs directly in tail position and the callback path is skipped.
/// On cancellation of the ambient token, `cancel_action` is invoked when
/// supplied (the operation then completes through its callback);
/// otherwise the computation resumes on the cancellation continuation via
/// a one-shot gate.
pub fn from_begin_end<P, T, B, E>(
    begin: B,
    end: E,
    cancel_action: Option<Arc<dyn Fn() + Send + Sync>>,
) -> Computation<T>
where
    P: IoPending,
    T: Value,
    B: Fn(IoCallback<P>) -> Arc<P> + Send + Sync + 'static,
    E: Fn(&Arc<P>) -> AsyncOutcome<T> + Send + Sync + 'static,
{
    let begin = Arc::new(begin);
    let end = Arc::new(end);
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let once = Arc::new(Latch::new());
        let captured_context = context::current();
        let registration: Arc<Mutex<Option<Registration>>> = Arc::new(Mutex::new(None));

        let callback: IoCallback<P> = {
            let once = Arc::clone(&once);
            let registration = Arc::clone(&registration);
            let end = Arc::clone(&end);
            let captured_context = captured_context.clone();
            let ctxt = ctxt.clone();
            Box::new(move |pending: &Arc<P>| {
                if pending.completed_synchronously() {
                    // The begin-side path below handles this inline.
                    return;
                }
                if once.enter() {
                    let _ = registration.lock().take();
                    let outcome = match protect(|| (*end)(pending)) {
                        Ok(outcome) => outcome,
                        Err(fault) => AsyncOutcome::Faulted(fault),
                    };
                    let resume = ctxt.clone();
                    ctxt.holder()
                        .post_or_queue_with_trampoline(&captured_context, move || {
                            resume.deliver(outcome)
                        });
                }
            })
        };

        let cancel_hook = {
            let once = Arc::clone(&once);
            let cancel_action = cancel_action.clone();
            let captured_context = captured_context.clone();
            let ctxt = ctxt.clone();
            move || {
                match &cancel_action {
                    // The operation will observe its own cancellation and
                    // finish through the completion callback.
                    Some(action) => (**action)(),
                    None => {
                        if once.enter() {
                            let resume = ctxt.clone();
                            ctxt.holder().post_or_queue_with_trampoline(
                                &captured_context,
                                move || resume.cancel_with_token(),
                            );
                        }
                    }
                }
            }
        };
        let reg = ctxt.token().register(cancel_hook);
        *registration.lock() = Some(reg);

        let pending = {
            let begin = Arc::clone(&begin);
            match protect(move || (*begin)(callback)) {
                Ok(pending) => pending,
                Err(fault) => {
                    return if once.enter() {
                        let _ = registration.lock().take();
                        ctxt.fail(fault)
                    } else {
                        Step::done()
                    };
                }
            }
        };

        if pending.completed_synchronously() && once.enter() {
            let _ = registration.lock().take();
            let outcome = match protect(|| (*end)(&pending)) {
                Ok(outcome) => outcome,
                Err(fault) => AsyncOutcome::Faulted(fault),
            };
            return ctxt.deliver(outcome);
        }
        if once.is_entered() {
            let _ = registration.lock().take();
        }
        Step::done()
    })
}

/// A pending handle for a computation exposed as a begin/end pair.
pub struct IoOperation<T> {
    cell: ResultCell<AsyncOutcome<T>>,
    gate: Arc<ManualResetGate>,
    source: CancelSource,
    synchronous: AtomicBool,
    in_begin: AtomicBool,
}

impl<T: Value + Clone> IoPending for IoOperation<T> {
    fn is_completed(&self) -> bool {
        self.cell.result_available()
    }

    fn completed_synchronously(&self) -> bool {
        self.synchronous.load(Ordering::Acquire)
    }

    fn wait_gate(&self) -> Arc<ManualResetGate> {
        Arc::clone(&self.gate)
    }
}

impl<T> fmt::Debug for IoOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoOperation")
            .field("synchronous", &self.synchronous.load(Ordering::Relaxed))
            .finish()
    }
}

/// A computation exposed through the begin/end contract.
pub struct BeginEnd<T> {
    computation: Computation<T>,
}

impl<T> Clone for BeginEnd<T> {
    fn clone(&self) -> Self {
        Self {
            computation: self.computation.clone(),
        }
    }
}

impl<T> fmt::Debug for BeginEnd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BeginEnd")
    }
}

/// Exposes `computation` as a `(begin, end, cancel)` triple.
pub fn as_begin_end<T: Value + Clone>(computation: &Computation<T>) -> BeginEnd<T> {
    BeginEnd {
        computation: computation.clone(),
    }
}

impl<T: Value + Clone> BeginEnd<T> {
    /// Starts the computation and returns its pending handle.
    ///
    /// The computation starts inline under a token owned by the handle;
    /// `callback`, when supplied, fires once the outcome is committed
    /// (skipped for synchronous completion, which the handle reports via
    /// `completed_synchronously`).
    pub fn begin(&self, callback: Option<IoCallback<IoOperation<T>>>) -> Arc<IoOperation<T>> {
        let cell: ResultCell<AsyncOutcome<T>> = ResultCell::new();
        let operation = Arc::new(IoOperation {
            gate: cell.wait_gate(),
            cell,
            source: CancelSource::new(),
            synchronous: AtomicBool::new(false),
            in_begin: AtomicBool::new(true),
        });

        let callback = Arc::new(Mutex::new(callback));
        let deliver = {
            let operation = Arc::clone(&operation);
            let callback = Arc::clone(&callback);
            move |outcome: AsyncOutcome<T>| {
                operation.cell.register_result(outcome, false);
                if !operation.in_begin.load(Ordering::Acquire) {
                    if let Some(callback) = callback.lock().take() {
                        callback(&operation);
                    }
                }
            }
        };

        let on_ok = deliver.clone();
        let on_fault = deliver.clone();
        let on_cancel = deliver;
        start_with_continuations(
            &self.computation,
            move |value: T| on_ok(AsyncOutcome::Ok(value)),
            move |fault: Fault| on_fault(AsyncOutcome::Faulted(fault)),
            move |cancelled: Cancelled| on_cancel(AsyncOutcome::Cancelled(cancelled)),
            Some(operation.source.token()),
        );

        operation.in_begin.store(false, Ordering::Release);
        if operation.cell.result_available() {
            // Completed before begin returned. The callback still fires
            // (observing `completed_synchronously`), mirroring the ambient
            // asynchronous-result contract.
            operation.synchronous.store(true, Ordering::Release);
            if let Some(callback) = callback.lock().take() {
                callback(&operation);
            }
        }
        operation
    }

    /// Blocks until the outcome of `operation` is available and returns
    /// it.
    pub fn end(&self, operation: &Arc<IoOperation<T>>) -> AsyncOutcome<T> {
        operation
            .cell
            .try_wait_synchronously(None)
            .unwrap_or_else(|| {
                AsyncOutcome::Faulted(Fault::new("io operation abandoned without an outcome"))
            })
    }

    /// Requests cancellation of the operation via its captured token.
    pub fn cancel(&self, operation: &Arc<IoOperation<T>>) {
        operation.source.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelSource, CancelToken};
    use crate::ops;
    use crate::run::run_synchronously;
    use std::thread;
    use std::time::Duration;

    fn token() -> CancelToken {
        CancelSource::new().token()
    }

    fn slow_value(delay_ms: u64, value: u32) -> Computation<u32> {
        ops::sequential(
            crate::bridge::sleep::sleep(Duration::from_millis(delay_ms)),
            ops::pure(value),
        )
    }

    #[test]
    fn synchronous_completion_is_reported() {
        let pair = as_begin_end(&ops::pure(5));
        let operation = pair.begin(None);
        assert!(operation.completed_synchronously());
        assert!(operation.is_completed());
        assert_eq!(pair.end(&operation).unwrap(), 5);
    }

    #[test]
    fn asynchronous_completion_fires_the_callback() {
        let pair = as_begin_end(&slow_value(20, 9));
        let fired = Arc::new(ManualResetGate::new(false));
        let observer = Arc::clone(&fired);
        let operation = pair.begin(Some(Box::new(move |pending| {
            assert!(pending.is_completed());
            observer.set();
        })));
        assert!(!operation.completed_synchronously());
        assert!(fired.wait_timeout(Duration::from_secs(5)));
        assert_eq!(pair.end(&operation).unwrap(), 9);
    }

    #[test]
    fn end_blocks_until_the_outcome() {
        let pair = as_begin_end(&slow_value(30, 4));
        let operation = pair.begin(None);
        assert_eq!(pair.end(&operation).unwrap(), 4);
    }

    #[test]
    fn cancel_reaches_the_computation() {
        let pair = as_begin_end(&slow_value(5_000, 1));
        let operation = pair.begin(None);
        thread::sleep(Duration::from_millis(20));
        pair.cancel(&operation);
        let outcome = pair.end(&operation);
        assert!(outcome.is_cancelled());
    }

    #[test]
    fn wait_gate_signals_completion() {
        let pair = as_begin_end(&slow_value(20, 2));
        let operation = pair.begin(None);
        assert!(operation.wait_gate().wait_timeout(Duration::from_secs(5)));
        assert!(operation.is_completed());
    }

    #[test]
    fn round_trip_success() {
        let pair = as_begin_end(&ops::pure(123));
        let end_pair = pair.clone();
        let comp = from_begin_end(
            move |callback| pair.begin(Some(callback)),
            move |operation| end_pair.end(operation),
            None,
        );
        assert_eq!(run_synchronously(&comp, None, Some(token())).expect("ok"), 123);
    }

    #[test]
    fn round_trip_async_success() {
        let pair = as_begin_end(&slow_value(25, 31));
        let end_pair = pair.clone();
        let comp = from_begin_end(
            move |callback| pair.begin(Some(callback)),
            move |operation| end_pair.end(operation),
            None,
        );
        assert_eq!(run_synchronously(&comp, None, Some(token())).expect("ok"), 31);
    }

    #[test]
    fn round_trip_fault() {
        let pair = as_begin_end(&ops::raise::<u32>(Fault::new("io broke")));
        let end_pair = pair.clone();
        let comp = from_begin_end(
            move |callback| pair.begin(Some(callback)),
            move |operation| end_pair.end(operation),
            None,
        );
        let err = run_synchronously(&comp, None, Some(token())).expect_err("faults");
        assert_eq!(err.fault().expect("fault").message(), "io broke");
    }

    #[test]
    fn round_trip_cancellation() {
        let pair = as_begin_end(&slow_value(10_000, 1));
        let end_pair = pair.clone();
        let cancel_pair = pair.clone();
        let operation_slot: Arc<Mutex<Option<Arc<IoOperation<u32>>>>> =
            Arc::new(Mutex::new(None));
        let begin_slot = Arc::clone(&operation_slot);
        let cancel_slot = Arc::clone(&operation_slot);
        let comp = from_begin_end(
            move |callback| {
                let operation = pair.begin(Some(callback));
                *begin_slot.lock() = Some(Arc::clone(&operation));
                operation
            },
            move |operation| end_pair.end(operation),
            Some(Arc::new(move || {
                if let Some(operation) = cancel_slot.lock().as_ref() {
                    cancel_pair.cancel(operation);
                }
            })),
        );
        let source = CancelSource::new();
        let trigger = source.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            trigger.cancel();
        });
        let start = std::time::Instant::now();
        let err = run_synchronously(&comp, None, Some(source.token())).expect_err("cancelled");
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
        canceller.join().expect("canceller panicked");
    }
}
