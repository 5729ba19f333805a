//! Activations: the continuation bundle carried through every step.
//!
//! An [`Activation`] pairs the success continuation with the *aux* block
//! shared by reference through nested combinators: the exception
//! continuation, the cancellation continuation, the cancellation token,
//! and the trampoline holder. Sequencing replaces the success
//! continuation; the aux block rarely changes.
//!
//! [`Step`] is the completion marker every computation step returns. It is
//! unconstructible outside the crate, which encodes at the type level that
//! a step either invoked a continuation in tail position or parked the
//! activation for later resumption.

use crate::cancel::{CancelToken, Cancelled};
use crate::fault::Fault;
use crate::outcome::AsyncOutcome;
use crate::trampoline::TrampolineHolder;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Completion marker returned by every computation step.
#[must_use = "a completion step must be returned in tail position"]
pub(crate) struct Step {
    _sealed: (),
}

impl Step {
    pub(crate) const fn done() -> Self {
        Self { _sealed: () }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Step")
    }
}

/// A continuation: invoked at most once per delivery, shared as an `Arc`
/// because computations are re-runnable.
pub(crate) type Cont<T> = Arc<dyn Fn(T) -> Step + Send + Sync>;

/// The rarely-mutating portion of an activation.
pub(crate) struct Aux {
    pub(crate) token: CancelToken,
    pub(crate) econt: Cont<Fault>,
    pub(crate) ccont: Cont<Cancelled>,
    pub(crate) holder: TrampolineHolder,
}

/// The full continuation bundle for a computation producing `T`.
pub(crate) struct Activation<T> {
    pub(crate) cont: Cont<T>,
    pub(crate) aux: Arc<Aux>,
}

impl<T> Clone for Activation<T> {
    fn clone(&self) -> Self {
        Self {
            cont: Arc::clone(&self.cont),
            aux: Arc::clone(&self.aux),
        }
    }
}

impl<T: Send + 'static> Activation<T> {
    /// Builds a fresh root activation with the three terminal
    /// continuations.
    pub(crate) fn root(
        token: CancelToken,
        holder: TrampolineHolder,
        cont: Cont<T>,
        econt: Cont<Fault>,
        ccont: Cont<Cancelled>,
    ) -> Self {
        Self {
            cont,
            aux: Arc::new(Aux {
                token,
                econt,
                ccont,
                holder,
            }),
        }
    }

    pub(crate) fn token(&self) -> &CancelToken {
        &self.aux.token
    }

    pub(crate) fn holder(&self) -> &TrampolineHolder {
        &self.aux.holder
    }

    /// Delivers a value to the success continuation via the trampoline.
    pub(crate) fn succeed(&self, value: T) -> Step {
        let cont = Arc::clone(&self.cont);
        self.aux.holder.hijack(move || (*cont)(value))
    }

    /// Delivers a fault to the exception continuation via the trampoline.
    pub(crate) fn fail(&self, fault: Fault) -> Step {
        let econt = Arc::clone(&self.aux.econt);
        self.aux.holder.hijack(move || (*econt)(fault))
    }

    /// Delivers a signal to the cancellation continuation.
    pub(crate) fn deliver_cancel(&self, cancelled: Cancelled) -> Step {
        let ccont = Arc::clone(&self.aux.ccont);
        self.aux.holder.hijack(move || (*ccont)(cancelled))
    }

    /// Delivers cancellation carrying this activation's token.
    pub(crate) fn cancel_with_token(&self) -> Step {
        self.deliver_cancel(Cancelled::new(self.aux.token.clone()))
    }

    /// The cancellation pre-check every primitive performs before running
    /// user code.
    pub(crate) fn check_cancel(&self) -> Option<Step> {
        if self.aux.token.is_cancelled() {
            Some(self.cancel_with_token())
        } else {
            None
        }
    }

    /// Routes a terminal outcome to the matching continuation.
    pub(crate) fn deliver(&self, outcome: AsyncOutcome<T>) -> Step {
        match outcome {
            AsyncOutcome::Ok(value) => self.succeed(value),
            AsyncOutcome::Faulted(fault) => self.fail(fault),
            AsyncOutcome::Cancelled(cancelled) => self.deliver_cancel(cancelled),
        }
    }

    /// Same aux, new success continuation.
    pub(crate) fn with_cont<U: Send + 'static>(&self, cont: Cont<U>) -> Activation<U> {
        Activation {
            cont,
            aux: Arc::clone(&self.aux),
        }
    }

    /// New activation replacing the given continuations; `None` shares the
    /// existing one.
    pub(crate) fn derive<U: Send + 'static>(
        &self,
        cont: Cont<U>,
        econt: Option<Cont<Fault>>,
        ccont: Option<Cont<Cancelled>>,
    ) -> Activation<U> {
        Activation {
            cont,
            aux: Arc::new(Aux {
                token: self.aux.token.clone(),
                econt: econt.unwrap_or_else(|| Arc::clone(&self.aux.econt)),
                ccont: ccont.unwrap_or_else(|| Arc::clone(&self.aux.ccont)),
                holder: self.aux.holder.clone(),
            }),
        }
    }
}

/// Runs user code, converting a panic into a [`Fault`].
///
/// Combinators that hand control to user code route the `Err` side to the
/// exception continuation; nothing user-raised escapes the trampoline.
pub(crate) fn protect<R>(f: impl FnOnce() -> R) -> Result<R, Fault> {
    catch_unwind(AssertUnwindSafe(f)).map_err(Fault::from_panic)
}
