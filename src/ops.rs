//! Primitive combinators.
//!
//! Every primitive checks the cancellation token before running user code;
//! if cancelled, the cancellation continuation receives a fresh signal
//! carrying the token. User code (binder functions, delayed thunks, loop
//! guards, compensations, handlers) always runs under `protect`, so a
//! panic is captured with its site and routed through the exception
//! continuation instead of unwinding the trampoline.

use crate::activation::{protect, Activation, Cont, Step};
use crate::cancel::{CancelToken, Cancelled};
use crate::computation::{Computation, Value};
use crate::context::SyncContext;
use crate::fault::Fault;
use crate::gate::OnceAction;
use parking_lot::Mutex;
use std::sync::Arc;

/// Invokes `computation` under the activation's trampoline, counting the
/// invocation as a bind step.
pub(crate) fn invoke_hijack<T: Value>(computation: &Computation<T>, ctxt: Activation<T>) -> Step {
    let computation = computation.clone();
    let holder = ctxt.holder().clone();
    holder.hijack(move || computation.invoke(ctxt))
}

/// A computation that immediately succeeds with `value`.
pub fn pure<T: Value + Clone>(value: T) -> Computation<T> {
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        ctxt.succeed(value.clone())
    })
}

/// The unit computation.
pub fn zero() -> Computation<()> {
    pure(())
}

/// A computation that immediately delivers `fault` to the exception
/// continuation.
pub fn raise<T: Value>(fault: Fault) -> Computation<T> {
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        ctxt.fail(fault.clone())
    })
}

/// A computation that delivers a cancellation signal directly.
pub(crate) fn deliver_cancelled<T: Value>(cancelled: Cancelled) -> Computation<T> {
    Computation::new(move |ctxt| ctxt.deliver_cancel(cancelled.clone()))
}

/// Defers `thunk` until the computation runs; its result computation is
/// then invoked in place.
pub fn delay<T: Value>(thunk: impl Fn() -> Computation<T> + Send + Sync + 'static) -> Computation<T> {
    let thunk = Arc::new(thunk);
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let call = {
            let thunk = Arc::clone(&thunk);
            move || (*thunk)()
        };
        match protect(call) {
            Ok(computation) => invoke_hijack(&computation, ctxt),
            Err(fault) => ctxt.fail(fault),
        }
    })
}

/// Sequences `source` into `binder`: the value produced by `source` picks
/// the next computation.
pub fn bind<T: Value, U: Value>(
    source: Computation<T>,
    binder: impl Fn(T) -> Computation<U> + Send + Sync + 'static,
) -> Computation<U> {
    let binder = Arc::new(binder);
    Computation::new(move |ctxt: Activation<U>| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let binder = Arc::clone(&binder);
        let outer = ctxt.clone();
        let cont: Cont<T> = Arc::new(move |value: T| {
            let call = {
                let binder = Arc::clone(&binder);
                move || (*binder)(value)
            };
            match protect(call) {
                Ok(next) => next.invoke(outer.clone()),
                Err(fault) => outer.fail(fault),
            }
        });
        let inner = ctxt.with_cont(cont);
        invoke_hijack(&source, inner)
    })
}

/// Maps the value produced by `source`.
pub fn map<T: Value, U: Value>(
    source: Computation<T>,
    f: impl Fn(T) -> U + Send + Sync + 'static,
) -> Computation<U> {
    let f = Arc::new(f);
    Computation::new(move |ctxt: Activation<U>| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let f = Arc::clone(&f);
        let outer = ctxt.clone();
        let cont: Cont<T> = Arc::new(move |value: T| {
            let call = {
                let f = Arc::clone(&f);
                move || (*f)(value)
            };
            match protect(call) {
                Ok(mapped) => outer.succeed(mapped),
                Err(fault) => outer.fail(fault),
            }
        });
        invoke_hijack(&source, ctxt.with_cont(cont))
    })
}

/// Runs `first`, discards its unit result, then runs `second`.
pub fn sequential<U: Value>(first: Computation<()>, second: Computation<U>) -> Computation<U> {
    bind(first, move |()| second.clone())
}

/// Alias of [`sequential`] matching the builder surface.
pub fn combine<U: Value>(first: Computation<()>, second: Computation<U>) -> Computation<U> {
    sequential(first, second)
}

/// Discards the value produced by `source`.
pub fn ignore<T: Value>(source: Computation<T>) -> Computation<()> {
    map(source, |_| ())
}

/// Reifies the outcome of `source` as a `Result`, capturing faults instead
/// of propagating them.
pub fn catch<T: Value>(source: Computation<T>) -> Computation<Result<T, Fault>> {
    Computation::new(move |ctxt: Activation<Result<T, Fault>>| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let on_ok = ctxt.clone();
        let cont: Cont<T> = Arc::new(move |value| on_ok.succeed(Ok(value)));
        let on_err = ctxt.clone();
        let econt: Cont<Fault> = Arc::new(move |fault| on_err.succeed(Err(fault)));
        let inner = ctxt.derive(cont, Some(econt), None);
        invoke_hijack(&source, inner)
    })
}

/// Runs `source`; on a fault, `handler` picks the replacement computation,
/// which runs under the original activation. A fault raised by the handler
/// itself flows to the outer exception continuation.
pub fn try_with<T: Value>(
    source: Computation<T>,
    handler: impl Fn(Fault) -> Computation<T> + Send + Sync + 'static,
) -> Computation<T> {
    let handler = Arc::new(handler);
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let handler = Arc::clone(&handler);
        let outer = ctxt.clone();
        let econt: Cont<Fault> = Arc::new(move |fault: Fault| {
            let call = {
                let handler = Arc::clone(&handler);
                let fault = fault.clone();
                move || (*handler)(fault)
            };
            match protect(call) {
                Ok(replacement) => replacement.invoke(outer.clone()),
                Err(handler_fault) => outer.fail(handler_fault),
            }
        });
        let inner = ctxt.derive(Arc::clone(&ctxt.cont), Some(econt), None);
        invoke_hijack(&source, inner)
    })
}

/// Runs `compensation` on every exit path of `source`.
///
/// A fault raised by the compensation replaces the in-flight outcome on
/// the success and fault paths; on the cancellation path it is dropped and
/// cancellation wins.
pub fn try_finally<T: Value>(
    source: Computation<T>,
    compensation: impl Fn() + Send + Sync + 'static,
) -> Computation<T> {
    let compensation = Arc::new(compensation);
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let on_ok = ctxt.clone();
        let comp = Arc::clone(&compensation);
        let cont: Cont<T> = Arc::new(move |value: T| {
            let call = {
                let comp = Arc::clone(&comp);
                move || (*comp)()
            };
            match protect(call) {
                Ok(()) => on_ok.succeed(value),
                Err(fault) => on_ok.fail(fault),
            }
        });

        let on_err = ctxt.clone();
        let comp = Arc::clone(&compensation);
        let econt: Cont<Fault> = Arc::new(move |fault: Fault| {
            let call = {
                let comp = Arc::clone(&comp);
                move || (*comp)()
            };
            match protect(call) {
                Ok(()) => on_err.fail(fault),
                Err(compensation_fault) => on_err.fail(compensation_fault),
            }
        });

        let on_cancel = ctxt.clone();
        let comp = Arc::clone(&compensation);
        let ccont: Cont<Cancelled> = Arc::new(move |cancelled: Cancelled| {
            // A compensation fault is dropped here: cancellation wins.
            let _ = protect({
                let comp = Arc::clone(&comp);
                move || (*comp)()
            });
            on_cancel.deliver_cancel(cancelled)
        });

        let inner = ctxt.derive(cont, Some(econt), Some(ccont));
        invoke_hijack(&source, inner)
    })
}

/// Runs `on_cancelled` if `source` exits through the cancellation
/// continuation, then proceeds with the cancellation.
pub fn try_cancelled<T: Value>(
    source: Computation<T>,
    on_cancelled: impl Fn(Cancelled) + Send + Sync + 'static,
) -> Computation<T> {
    let on_cancelled = Arc::new(on_cancelled);
    Computation::new(move |ctxt| {
        let handler = Arc::clone(&on_cancelled);
        let outer = ctxt.clone();
        let ccont: Cont<Cancelled> = Arc::new(move |cancelled: Cancelled| {
            let _ = protect({
                let handler = Arc::clone(&handler);
                let cancelled = cancelled.clone();
                move || (*handler)(cancelled)
            });
            outer.deliver_cancel(cancelled)
        });
        let inner = ctxt.derive(Arc::clone(&ctxt.cont), None, Some(ccont));
        // Pre-cancelled entry still runs the compensation hook.
        if let Some(step) = inner.check_cancel() {
            return step;
        }
        invoke_hijack(&source, inner)
    })
}

/// A resource whose cleanup can run from any completion path.
pub trait Disposable: Send + Sync {
    /// Releases the resource. Called at most once by [`using`].
    fn dispose(&self);
}

/// Scopes `resource` to the computation produced by `body`.
///
/// Disposal is guarded by a one-shot gate and runs on normal exit, fault
/// exit, and cancellation, whichever comes first.
pub fn using<R, T>(
    resource: Arc<R>,
    body: impl Fn(Arc<R>) -> Computation<T> + Send + Sync + 'static,
) -> Computation<T>
where
    R: Disposable + 'static,
    T: Value,
{
    let body = Arc::new(body);
    Computation::new(move |ctxt| {
        let dispose = {
            let resource = Arc::clone(&resource);
            Arc::new(OnceAction::new(move || resource.dispose()))
        };
        let run_body = {
            let body = Arc::clone(&body);
            let resource = Arc::clone(&resource);
            delay(move || (*body)(Arc::clone(&resource)))
        };
        let on_exit = Arc::clone(&dispose);
        let guarded = try_finally(run_body, move || {
            on_exit.fire();
        });
        let on_cancel = Arc::clone(&dispose);
        let scoped = try_cancelled(guarded, move |_| {
            on_cancel.fire();
        });
        invoke_hijack(&scoped, ctxt)
    })
}

struct WhileState {
    guard: Box<dyn Fn() -> bool + Send + Sync>,
    body: Computation<()>,
}

fn invoke_while(state: Arc<WhileState>, ctxt: Activation<()>) -> Step {
    if let Some(step) = ctxt.check_cancel() {
        return step;
    }
    match protect(|| (state.guard)()) {
        Err(fault) => ctxt.fail(fault),
        Ok(false) => ctxt.succeed(()),
        Ok(true) => {
            let next_state = Arc::clone(&state);
            let outer = ctxt.clone();
            let cont: Cont<()> = Arc::new(move |()| {
                invoke_while(Arc::clone(&next_state), outer.clone())
            });
            let inner = ctxt.with_cont(cont);
            invoke_hijack(&state.body, inner)
        }
    }
}

/// Repeats `body` while `guard` returns `true`.
///
/// The guard runs under the current continuation's protection; a guard
/// panic faults the loop.
pub fn while_loop(
    guard: impl Fn() -> bool + Send + Sync + 'static,
    body: Computation<()>,
) -> Computation<()> {
    let state = Arc::new(WhileState {
        guard: Box::new(guard),
        body,
    });
    Computation::new(move |ctxt| invoke_while(Arc::clone(&state), ctxt))
}

struct ForState<T> {
    iter: Mutex<Box<dyn Iterator<Item = T> + Send>>,
    body: Box<dyn Fn(T) -> Computation<()> + Send + Sync>,
}

fn invoke_for<T: Send + 'static>(state: Arc<ForState<T>>, ctxt: Activation<()>) -> Step {
    if let Some(step) = ctxt.check_cancel() {
        return step;
    }
    let next = match protect(|| state.iter.lock().next()) {
        Ok(next) => next,
        Err(fault) => return ctxt.fail(fault),
    };
    match next {
        None => ctxt.succeed(()),
        Some(item) => {
            let body = match protect(|| (state.body)(item)) {
                Ok(body) => body,
                Err(fault) => return ctxt.fail(fault),
            };
            let next_state = Arc::clone(&state);
            let outer = ctxt.clone();
            let cont: Cont<()> = Arc::new(move |()| {
                invoke_for(Arc::clone(&next_state), outer.clone())
            });
            invoke_hijack(&body, ctxt.with_cont(cont))
        }
    }
}

/// Runs `body` for each item of `items`, in order.
///
/// Each run of the resulting computation iterates `items` afresh; the
/// iterator advances one item per loop step, so `body` may suspend.
pub fn for_each<I, T, F>(items: I, body: F) -> Computation<()>
where
    I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    T: Send + 'static,
    F: Fn(T) -> Computation<()> + Send + Sync + 'static,
{
    let body = Arc::new(body);
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let iter: Box<dyn Iterator<Item = T> + Send> = Box::new(items.clone().into_iter());
        let body = Arc::clone(&body);
        let state = Arc::new(ForState {
            iter: Mutex::new(iter),
            body: Box::new(move |item| (*body)(item)),
        });
        invoke_for(state, ctxt)
    })
}

/// Moves the rest of the computation onto `target`; `None` queues on the
/// worker pool instead.
pub fn switch_to_context(target: Option<Arc<dyn SyncContext>>) -> Computation<()> {
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let resume = ctxt.clone();
        ctxt.holder()
            .post_or_queue_with_trampoline(&target, move || resume.succeed(()));
        Step::done()
    })
}

/// Moves the rest of the computation onto a worker pool thread.
pub fn switch_to_thread_pool() -> Computation<()> {
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let resume = ctxt.clone();
        ctxt.holder()
            .queue_work_item_with_trampoline(move || resume.succeed(()));
        Step::done()
    })
}

/// Moves the rest of the computation onto a dedicated background thread.
pub fn switch_to_new_thread() -> Computation<()> {
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let resume = ctxt.clone();
        ctxt.holder()
            .start_thread_with_trampoline(move || resume.succeed(()));
        Step::done()
    })
}

/// Yields the cancellation token the computation is running under.
pub fn cancellation_token() -> Computation<CancelToken> {
    Computation::new(|ctxt| {
        let token = ctxt.token().clone();
        ctxt.succeed(token)
    })
}

/// Checks for cancellation and otherwise succeeds with unit.
pub fn cancel_check() -> Computation<()> {
    Computation::new(|ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        ctxt.succeed(())
    })
}
