//! Runners: the entry points that execute computations.
//!
//! A runner allocates a trampoline holder, builds a root activation whose
//! three terminal continuations commit the outcome somewhere observable (a
//! result cell, user callbacks), and invokes the computation under the
//! trampoline. Synchronous runners then wait on the cell; background
//! runners return immediately.

use crate::activation::{Activation, Cont, Step};
use crate::cancel::{self, CancelToken, Cancelled, LinkedSource};
use crate::cell::ResultCell;
use crate::computation::{Computation, Value};
use crate::context;
use crate::error::{Elapsed, RunError};
use crate::fault::{Fault, FaultDispatchInfo};
use crate::ops;
use crate::outcome::AsyncOutcome;
use crate::tracing_compat::{debug, error};
use crate::trampoline::TrampolineHolder;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Wraps a user callback so a second invocation fails hard.
fn once_cont<A: Send + 'static>(callback: impl FnOnce(A) + Send + 'static) -> Cont<A> {
    let slot = Mutex::new(Some(callback));
    Arc::new(move |value: A| {
        match slot.lock().take() {
            Some(callback) => callback(value),
            None => panic!("a terminal continuation was invoked more than once"),
        }
        Step::done()
    })
}

/// Terminal continuations that commit the outcome into `cell`.
fn outcome_conts<T: Value + Clone>(
    cell: &ResultCell<AsyncOutcome<T>>,
    reuse_thread: bool,
) -> (Cont<T>, Cont<Fault>, Cont<Cancelled>) {
    let on_ok = cell.clone();
    let on_fault = cell.clone();
    let on_cancel = cell.clone();
    (
        Arc::new(move |value: T| {
            on_ok.register_result(AsyncOutcome::Ok(value), reuse_thread);
            Step::done()
        }),
        Arc::new(move |fault: Fault| {
            on_fault.register_result(AsyncOutcome::Faulted(fault), reuse_thread);
            Step::done()
        }),
        Arc::new(move |cancelled: Cancelled| {
            on_cancel.register_result(AsyncOutcome::Cancelled(cancelled), reuse_thread);
            Step::done()
        }),
    )
}

/// Queues `computation` on the worker pool under a fresh holder with the
/// given terminal continuations.
pub(crate) fn queue_computation<T: Value>(
    token: CancelToken,
    computation: &Computation<T>,
    cont: Cont<T>,
    econt: Cont<Fault>,
    ccont: Cont<Cancelled>,
) {
    let holder = TrampolineHolder::new();
    let activation = Activation::root(token, holder.clone(), cont, econt, ccont);
    let computation = computation.clone();
    holder.queue_work_item_with_trampoline(move || computation.invoke(activation));
}

/// A computation that yields the outcome committed into `cell`, routing
/// each variant to the matching continuation. `cancel_as_fault` selects
/// whether a cancelled outcome re-surfaces as a fault or as cancellation.
pub(crate) fn await_outcome<T: Value + Clone>(
    cell: &ResultCell<AsyncOutcome<T>>,
    cancel_as_fault: bool,
) -> Computation<T> {
    ops::bind(cell.await_result(), move |outcome| match outcome {
        AsyncOutcome::Ok(value) => ops::pure(value),
        AsyncOutcome::Faulted(fault) => ops::raise(fault),
        AsyncOutcome::Cancelled(cancelled) => {
            if cancel_as_fault {
                ops::raise(Fault::new("the awaited operation was cancelled"))
            } else {
                ops::deliver_cancelled(cancelled)
            }
        }
    })
}

/// Runs `computation` to completion on the calling thread's schedule.
///
/// With no timeout and no current sync context the computation starts on
/// this thread; otherwise it is queued on the pool and this thread blocks
/// on the result (posting to the current context from under a synchronous
/// wait would deadlock it).
///
/// Returns the delivered value, or the fault / cancellation / timeout as
/// a [`RunError`]. On timeout the computation is cancelled and drained
/// before the error returns.
pub fn run_synchronously<T: Value + Clone>(
    computation: &Computation<T>,
    timeout: Option<Duration>,
    token: Option<CancelToken>,
) -> Result<T, RunError> {
    let token = token.unwrap_or_else(cancel::default_token);
    if timeout.is_none() && context::current().is_none() {
        run_in_current_thread(computation, token)
    } else {
        run_in_worker_thread(computation, token, timeout)
    }
}

fn run_in_current_thread<T: Value + Clone>(
    computation: &Computation<T>,
    token: CancelToken,
) -> Result<T, RunError> {
    let holder = TrampolineHolder::new();
    let cell = ResultCell::new();
    let (cont, econt, ccont) = outcome_conts(&cell, true);
    let activation = Activation::root(token, holder.clone(), cont, econt, ccont);
    let computation = computation.clone();
    let _ = holder.execute_with_trampoline(move || computation.invoke(activation));
    let outcome = cell
        .try_wait_synchronously(None)
        .expect("the computation must deliver exactly one result");
    outcome.into_result()
}

fn run_in_worker_thread<T: Value + Clone>(
    computation: &Computation<T>,
    token: CancelToken,
    timeout: Option<Duration>,
) -> Result<T, RunError> {
    let cell = ResultCell::new();
    match timeout {
        None => {
            let (cont, econt, ccont) = outcome_conts(&cell, false);
            queue_computation(token, computation, cont, econt, ccont);
            let outcome = cell
                .try_wait_synchronously(None)
                .expect("the computation must deliver exactly one result");
            outcome.into_result()
        }
        Some(timeout) => {
            // The computation observes a derived token so the timeout can
            // cancel it without touching the caller's token.
            let linked = LinkedSource::new(&token);
            let (cont, econt, ccont) = outcome_conts(&cell, false);
            queue_computation(linked.token(), computation, cont, econt, ccont);
            match cell.try_wait_synchronously(Some(timeout)) {
                Some(outcome) => outcome.into_result(),
                None => {
                    debug!("synchronous run timed out, cancelling and draining");
                    linked.cancel();
                    // The computation must quiesce before the wait returns.
                    let _ = cell.try_wait_synchronously(None);
                    cell.close();
                    Err(RunError::Timeout(Elapsed::new(timeout)))
                }
            }
        }
    }
}

/// Starts `computation` on the worker pool and returns immediately.
///
/// A fault escalates on the worker thread (where the pool logs it);
/// cancellation is swallowed.
pub fn start(computation: &Computation<()>, token: Option<CancelToken>) {
    let token = token.unwrap_or_else(cancel::default_token);
    queue_computation(
        token,
        computation,
        Arc::new(|()| Step::done()),
        Arc::new(|fault: Fault| {
            error!("background computation faulted");
            fault.escalate()
        }),
        Arc::new(|_cancelled: Cancelled| Step::done()),
    );
}

/// A completion-cell-backed handle to a started computation.
pub struct TaskHandle<T> {
    cell: ResultCell<AsyncOutcome<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Value + Clone> TaskHandle<T> {
    /// Returns `true` once the computation has delivered an outcome.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.cell.result_available()
    }

    /// Blocks until the outcome is available.
    #[must_use]
    pub fn join(&self) -> AsyncOutcome<T> {
        self.cell
            .try_wait_synchronously(None)
            .expect("a started computation must deliver exactly one outcome")
    }

    /// Blocks up to `timeout` for the outcome.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<AsyncOutcome<T>> {
        self.cell.try_wait_synchronously(Some(timeout))
    }

    pub(crate) fn cell(&self) -> &ResultCell<AsyncOutcome<T>> {
        &self.cell
    }

    pub(crate) fn from_cell(cell: ResultCell<AsyncOutcome<T>>) -> Self {
        Self { cell }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").finish()
    }
}

/// Starts `computation` on the worker pool, wiring its continuations to a
/// completion cell, and returns the handle.
pub fn start_as_task<T: Value + Clone>(
    computation: &Computation<T>,
    token: Option<CancelToken>,
) -> TaskHandle<T> {
    let token = token.unwrap_or_else(cancel::default_token);
    let cell = ResultCell::new();
    let (cont, econt, ccont) = outcome_conts(&cell, false);
    queue_computation(token, computation, cont, econt, ccont);
    TaskHandle::from_cell(cell)
}

/// Runs `computation` inline on the calling thread with a fresh
/// trampoline; the three callbacks terminate the three paths. No outcome
/// escapes the runner.
pub fn start_with_continuations<T: Value>(
    computation: &Computation<T>,
    on_success: impl FnOnce(T) + Send + 'static,
    on_fault: impl FnOnce(Fault) + Send + 'static,
    on_cancelled: impl FnOnce(Cancelled) + Send + 'static,
    token: Option<CancelToken>,
) {
    let token = token.unwrap_or_else(cancel::default_token);
    let holder = TrampolineHolder::new();
    let activation = Activation::root(
        token,
        holder.clone(),
        once_cont(on_success),
        once_cont(on_fault),
        once_cont(on_cancelled),
    );
    let computation = computation.clone();
    let _ = holder.execute_with_trampoline(move || computation.invoke(activation));
}

/// [`start_with_continuations`] variant whose fault callback receives the
/// fault paired with its preserved capture site.
pub fn start_with_continuations_dispatch_info<T: Value>(
    computation: &Computation<T>,
    on_success: impl FnOnce(T) + Send + 'static,
    on_fault: impl FnOnce(FaultDispatchInfo) + Send + 'static,
    on_cancelled: impl FnOnce(Cancelled) + Send + 'static,
    token: Option<CancelToken>,
) {
    start_with_continuations(
        computation,
        on_success,
        move |fault| on_fault(FaultDispatchInfo::capture(&fault)),
        on_cancelled,
        token,
    );
}

/// Runs `computation` inline on the calling thread. A fault escalates on
/// this thread; cancellation is swallowed.
pub fn start_immediate(computation: &Computation<()>, token: Option<CancelToken>) {
    start_with_continuations(
        computation,
        |()| (),
        |fault| fault.escalate(),
        |_cancelled| (),
        token,
    );
}

/// Runs `computation` inline on the calling thread and returns a handle to
/// its completion cell.
pub fn start_immediate_as_task<T: Value + Clone>(
    computation: &Computation<T>,
    token: Option<CancelToken>,
) -> TaskHandle<T> {
    let token = token.unwrap_or_else(cancel::default_token);
    let cell = ResultCell::new();
    let (cont, econt, ccont) = outcome_conts(&cell, true);
    let holder = TrampolineHolder::new();
    let activation = Activation::root(token, holder.clone(), cont, econt, ccont);
    let computation = computation.clone();
    let _ = holder.execute_with_trampoline(move || computation.invoke(activation));
    TaskHandle::from_cell(cell)
}
