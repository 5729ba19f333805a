//! Awaiting manual-reset gates and pending I/O handles.

use crate::activation::Step;
use crate::bridge::begin_end::IoPending;
use crate::cancel::Registration;
use crate::computation::Computation;
use crate::context;
use crate::gate::{Latch, ManualResetGate};
use crate::pool;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

// Slice length for pool-side waits; bounds how long a worker lingers
// after the wait has been settled by cancellation.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Suspends until `gate` is signalled or `timeout` elapses.
///
/// Yields `true` when the gate was signalled, `false` on timeout. A zero
/// timeout polls the gate without suspending. The wait itself occupies a
/// pool worker in bounded slices; cancellation of the ambient token
/// abandons the wait and resumes the cancellation continuation.
pub fn await_gate(gate: Arc<ManualResetGate>, timeout: Option<Duration>) -> Computation<bool> {
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        if timeout == Some(Duration::ZERO) {
            return ctxt.succeed(gate.is_set());
        }
        let latch = Arc::new(Latch::new());
        let captured_context = context::current();
        let registration: Arc<Mutex<Option<Registration>>> = Arc::new(Mutex::new(None));

        {
            let gate = Arc::clone(&gate);
            let latch = Arc::clone(&latch);
            let registration = Arc::clone(&registration);
            let captured_context = captured_context.clone();
            let ctxt = ctxt.clone();
            pool::queue_global(move || {
                let deadline = timeout.map(|t| Instant::now() + t);
                let signalled = loop {
                    if latch.is_entered() {
                        // Cancellation settled the wait; nothing to do.
                        return;
                    }
                    let slice = match deadline {
                        None => WAIT_SLICE,
                        Some(deadline) => {
                            let remaining = deadline.saturating_duration_since(Instant::now());
                            if remaining.is_zero() {
                                break false;
                            }
                            remaining.min(WAIT_SLICE)
                        }
                    };
                    if gate.wait_timeout(slice) {
                        break true;
                    }
                };
                if latch.enter() {
                    let _ = registration.lock().take();
                    let resume = ctxt.clone();
                    ctxt.holder()
                        .post_or_queue_with_trampoline(&captured_context, move || {
                            resume.succeed(signalled)
                        });
                }
            });
        }

        let cancel_hook = {
            let latch = Arc::clone(&latch);
            let ctxt = ctxt.clone();
            move || {
                if latch.enter() {
                    let resume = ctxt.clone();
                    ctxt.holder()
                        .post_or_queue_with_trampoline(&captured_context, move || {
                            resume.cancel_with_token()
                        });
                }
            }
        };
        let reg = ctxt.token().register(cancel_hook);
        *registration.lock() = Some(reg);
        if latch.is_entered() {
            let _ = registration.lock().take();
        }
        Step::done()
    })
}

/// Suspends until a pending I/O handle's wait gate is signalled.
///
/// Yields `true` when the operation completed, `false` on timeout.
pub fn await_io_result<P: IoPending + ?Sized>(
    pending: &Arc<P>,
    timeout: Option<Duration>,
) -> Computation<bool> {
    await_gate(pending.wait_gate(), timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelSource, CancelToken};
    use crate::run::run_synchronously;
    use std::thread;

    fn token() -> CancelToken {
        CancelSource::new().token()
    }

    #[test]
    fn zero_timeout_polls() {
        let set = Arc::new(ManualResetGate::new(true));
        let unset = Arc::new(ManualResetGate::new(false));
        assert!(run_synchronously(
            &await_gate(set, Some(Duration::ZERO)),
            None,
            Some(token())
        )
        .expect("ok"));
        assert!(!run_synchronously(
            &await_gate(unset, Some(Duration::ZERO)),
            None,
            Some(token())
        )
        .expect("ok"));
    }

    #[test]
    fn wait_sees_signal() {
        let gate = Arc::new(ManualResetGate::new(false));
        let signaller = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            signaller.set();
        });
        assert!(run_synchronously(
            &await_gate(gate, Some(Duration::from_secs(5))),
            None,
            Some(token())
        )
        .expect("ok"));
        handle.join().expect("signaller panicked");
    }

    #[test]
    fn wait_times_out_with_false() {
        let gate = Arc::new(ManualResetGate::new(false));
        let start = Instant::now();
        assert!(!run_synchronously(
            &await_gate(gate, Some(Duration::from_millis(40))),
            None,
            Some(token())
        )
        .expect("ok"));
        assert!(start.elapsed() >= Duration::from_millis(35));
    }

    #[test]
    fn cancellation_abandons_the_wait() {
        let gate = Arc::new(ManualResetGate::new(false));
        let source = CancelSource::new();
        let cancel_source = source.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            cancel_source.cancel();
        });
        let err = run_synchronously(&await_gate(gate, None), None, Some(source.token()))
            .expect_err("cancelled");
        assert!(err.is_cancelled());
        canceller.join().expect("canceller panicked");
    }
}
