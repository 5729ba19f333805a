//! Timed suspension.

use crate::activation::Step;
use crate::cancel::Registration;
use crate::computation::Computation;
use crate::context;
use crate::gate::Latch;
use crate::timer;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Suspends the computation for `duration`.
///
/// A one-shot timer resumes the success continuation on the sync context
/// captured at suspension (else the worker pool). Cancelling the ambient
/// token while the timer is pending disposes the timer and resumes the
/// cancellation continuation instead; a latch makes the two paths
/// mutually exclusive.
pub fn sleep(duration: Duration) -> Computation<()> {
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let latch = Arc::new(Latch::new());
        let captured_context = context::current();
        let registration: Arc<Mutex<Option<Registration>>> = Arc::new(Mutex::new(None));

        let timer_key = {
            let latch = Arc::clone(&latch);
            let registration = Arc::clone(&registration);
            let captured_context = captured_context.clone();
            let ctxt = ctxt.clone();
            timer::schedule(duration, move || {
                if latch.enter() {
                    let _ = registration.lock().take();
                    let resume = ctxt.clone();
                    ctxt.holder()
                        .post_or_queue_with_trampoline(&captured_context, move || {
                            resume.succeed(())
                        });
                }
            })
        };

        let cancel_hook = {
            let latch = Arc::clone(&latch);
            let ctxt = ctxt.clone();
            move || {
                if latch.enter() {
                    timer_key.cancel();
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
        // The timer may already have fired; drop a registration it could
        // not take.
        if latch.is_entered() {
            let _ = registration.lock().take();
        }
        Step::done()
    })
}
