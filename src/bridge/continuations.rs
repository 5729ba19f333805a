//! The general continuation-capture bridge.
//!
//! [`from_continuations`] hands user code three one-shot handles; the
//! first (and only) one invoked decides the computation's outcome.
//! Invoking a second handle, or any handle twice, fails hard.
//!
//! A handle invoked synchronously while the setup function is still on
//! the stack does not run the continuation immediately: the continuation
//! is parked and run in tail position after setup returns, preserving
//! tail-call behavior under synchronous signalling. A handle invoked from
//! another thread resumes through the trampoline machinery: post-or-queue
//! when a trampoline is already running on the invoking thread, a fresh
//! trampoline otherwise.

use crate::activation::{protect, Activation, Step};
use crate::cancel::Cancelled;
use crate::computation::{Computation, Value};
use crate::context;
use crate::fault::Fault;
use crate::gate::Latch;
use crate::trampoline;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

struct FcShared<T> {
    latch: Latch,
    parked: Mutex<Option<Box<dyn FnOnce() -> Step + Send>>>,
    setup_thread: ThreadId,
    in_setup: AtomicBool,
    activation: Activation<T>,
}

fn deliver<T: Value>(shared: &Arc<FcShared<T>>, run: Box<dyn FnOnce() -> Step + Send>) {
    assert!(
        shared.latch.enter(),
        "a continuation passed to from_continuations was invoked more than once"
    );
    let same_thread = thread::current().id() == shared.setup_thread;
    if same_thread && shared.in_setup.load(Ordering::Acquire) {
        // Synchronous completion: park, run in tail position after setup.
        *shared.parked.lock() = Some(run);
        return;
    }
    let holder = shared.activation.holder().clone();
    if trampoline::thread_running_trampoline() {
        holder.post_or_queue_with_trampoline(&context::current(), run);
    } else {
        let _ = holder.execute_with_trampoline(run);
    }
}

/// One-shot success continuation handle.
pub struct SuccessHandle<T> {
    shared: Arc<FcShared<T>>,
}

impl<T: Value> SuccessHandle<T> {
    /// Completes the computation with `value`.
    pub fn resolve(self, value: T) {
        let activation = self.shared.activation.clone();
        deliver(&self.shared, Box::new(move || activation.succeed(value)));
    }
}

/// One-shot fault continuation handle.
pub struct FaultHandle<T> {
    shared: Arc<FcShared<T>>,
}

impl<T: Value> FaultHandle<T> {
    /// Fails the computation with `fault`.
    pub fn reject(self, fault: Fault) {
        let activation = self.shared.activation.clone();
        deliver(&self.shared, Box::new(move || activation.fail(fault)));
    }
}

/// One-shot cancellation continuation handle.
pub struct CancelHandle<T> {
    shared: Arc<FcShared<T>>,
}

impl<T: Value> CancelHandle<T> {
    /// Cancels the computation, carrying its ambient token.
    pub fn cancel(self) {
        let activation = self.shared.activation.clone();
        let cancelled = Cancelled::new(activation.token().clone());
        deliver(
            &self.shared,
            Box::new(move || activation.deliver_cancel(cancelled)),
        );
    }
}

impl<T> fmt::Debug for SuccessHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SuccessHandle")
    }
}

impl<T> fmt::Debug for FaultHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FaultHandle")
    }
}

impl<T> fmt::Debug for CancelHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelHandle")
    }
}

/// Builds a computation from a callback-registering setup function.
///
/// `setup` receives the three continuation handles and registers them
/// with some external completion source (or invokes one synchronously).
/// A panic inside `setup` is delivered through the fault handle's path if
/// no handle has been used yet; after a handle has fired it has nowhere
/// to go and escalates.
pub fn from_continuations<T, F>(setup: F) -> Computation<T>
where
    T: Value,
    F: Fn(SuccessHandle<T>, FaultHandle<T>, CancelHandle<T>) + Send + Sync + 'static,
{
    let setup = Arc::new(setup);
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let shared = Arc::new(FcShared {
            latch: Latch::new(),
            parked: Mutex::new(None),
            setup_thread: thread::current().id(),
            in_setup: AtomicBool::new(true),
            activation: ctxt.clone(),
        });
        let result = {
            let setup = Arc::clone(&setup);
            let success = SuccessHandle {
                shared: Arc::clone(&shared),
            };
            let fault = FaultHandle {
                shared: Arc::clone(&shared),
            };
            let cancel = CancelHandle {
                shared: Arc::clone(&shared),
            };
            protect(move || (*setup)(success, fault, cancel))
        };
        shared.in_setup.store(false, Ordering::Release);
        match result {
            Ok(()) => match shared.parked.lock().take() {
                Some(run) => run(),
                None => Step::done(),
            },
            Err(setup_fault) => {
                if shared.latch.enter() {
                    ctxt.fail(setup_fault)
                } else {
                    // A continuation was already chosen; nothing is left
                    // to receive the setup fault.
                    setup_fault.escalate()
                }
            }
        }
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

    #[test]
    fn synchronous_resolve_completes() {
        let comp = from_continuations(|success: SuccessHandle<i32>, _fault, _cancel| {
            success.resolve(17);
        });
        assert_eq!(run_synchronously(&comp, None, Some(token())).expect("ok"), 17);
    }

    #[test]
    fn synchronous_reject_faults() {
        let comp = from_continuations(|_success: SuccessHandle<i32>, fault, _cancel| {
            fault.reject(Fault::new("declined"));
        });
        let err = run_synchronously(&comp, None, Some(token())).expect_err("faults");
        assert_eq!(err.fault().expect("fault").message(), "declined");
    }

    #[test]
    fn synchronous_cancel_cancels() {
        let comp = from_continuations(|_success: SuccessHandle<i32>, _fault, cancel| {
            cancel.cancel();
        });
        let err = run_synchronously(&comp, None, Some(token())).expect_err("cancels");
        assert!(err.is_cancelled());
    }

    #[test]
    fn cross_thread_resolve_completes() {
        let comp = from_continuations(|success: SuccessHandle<i32>, _fault, _cancel| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                success.resolve(5);
            });
        });
        assert_eq!(run_synchronously(&comp, None, Some(token())).expect("ok"), 5);
    }

    #[test]
    fn setup_panic_becomes_fault() {
        let comp: Computation<i32> =
            from_continuations(|_success, _fault, _cancel| panic!("setup exploded"));
        let err = run_synchronously(&comp, None, Some(token())).expect_err("faults");
        assert!(err.fault().expect("fault").message().contains("setup exploded"));
    }

    #[test]
    fn double_invocation_fails_hard() {
        // The second resolve panics inside setup; the panic is captured,
        // and since a continuation was already chosen the runner escalates.
        let comp = from_continuations(|success: SuccessHandle<i32>, _fault, _cancel| {
            let shared = success.shared.clone();
            success.resolve(1);
            let again = SuccessHandle { shared };
            again.resolve(2);
        });
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            run_synchronously(&comp, None, Some(token()))
        }));
        assert!(outcome.is_err());
    }

    #[test]
    fn composes_with_bind() {
        let comp = ops::bind(
            from_continuations(|success: SuccessHandle<i32>, _fault, _cancel| {
                success.resolve(20)
            }),
            |x| ops::pure(x + 2),
        );
        assert_eq!(run_synchronously(&comp, None, Some(token())).expect("ok"), 22);
    }
}
