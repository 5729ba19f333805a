//! Cancellation interception guards.

use crate::cancel::Registration;
use crate::computation::Computation;
use crate::gate::Latch;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

struct GuardInner {
    latch: Latch,
    registration: Mutex<Option<Registration>>,
}

/// Disposable returned by [`on_cancel`].
///
/// Dropping (or disposing) the guard detaches the cancellation action;
/// the guard and the ambient token race through a latch, so the action
/// runs at most once and never after disposal wins.
pub struct CancelGuard {
    inner: Arc<GuardInner>,
}

impl CancelGuard {
    /// Detaches the cancellation action if it has not fired.
    pub fn dispose(&self) {
        if self.inner.latch.enter() {
            let _ = self.inner.registration.lock().take();
        }
    }

    /// Returns `true` once either side (action or disposal) has won.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.latch.is_entered()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for CancelGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelGuard")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Yields a guard that runs `action` if the ambient token is cancelled
/// before the guard is disposed.
pub fn on_cancel(action: impl Fn() + Send + Sync + 'static) -> Computation<CancelGuard> {
    let action = Arc::new(action);
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let inner = Arc::new(GuardInner {
            latch: Latch::new(),
            registration: Mutex::new(None),
        });
        let hook = {
            let action = Arc::clone(&action);
            let inner = Arc::clone(&inner);
            move || {
                if inner.latch.enter() {
                    (*action)();
                }
            }
        };
        let registration = ctxt.token().register(hook);
        *inner.registration.lock() = Some(registration);
        if inner.latch.is_entered() {
            let _ = inner.registration.lock().take();
        }
        ctxt.succeed(CancelGuard { inner })
    })
}
