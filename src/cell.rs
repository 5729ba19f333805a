//! One-shot result cells and suspended continuations.
//!
//! A [`ResultCell`] is the rendezvous between an asynchronous completion
//! source (timer, I/O callback, child computation) and the computations
//! waiting on it. It holds at most one result, an ordered list of
//! suspended waiters, and a lazily materialized wait gate for synchronous
//! waits. All state transitions take the cell's single lock; waiter
//! resumptions run outside it.
//!
//! A [`SuspendedCont`] snapshots the activation together with the sync
//! context and thread current at suspension time. Resumption is either
//! *immediate* (reuse the delivering thread when context and thread match
//! what was captured) or *post-or-queue* (schedule via the captured
//! context, else the worker pool).

use crate::activation::{Activation, Step};
use crate::computation::{Computation, Value};
use crate::context::{self, SyncContext};
use crate::fault::Fault;
use crate::gate::ManualResetGate;
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

/// A waiter snapshot: the activation plus the context and thread recorded
/// at suspension time.
pub(crate) struct SuspendedCont<T> {
    activation: Activation<T>,
    captured_context: Option<Arc<dyn SyncContext>>,
    captured_thread: ThreadId,
}

impl<T: Value> SuspendedCont<T> {
    /// Captures the current context and thread for later resumption.
    pub(crate) fn capture(activation: Activation<T>) -> Self {
        Self {
            activation,
            captured_context: context::current(),
            captured_thread: thread::current().id(),
        }
    }

    /// Resumes on the calling thread when safe, else posts or queues.
    ///
    /// The caller's stack is reused when the suspension happened under no
    /// context on a thread that currently has none, or when both the
    /// context (by pointer identity) and the thread match the capture.
    /// No scheduler concept beyond the context is consulted.
    pub(crate) fn resume_immediate(self, value: T) {
        let current_context = context::current();
        let same_thread = thread::current().id() == self.captured_thread;
        let reuse = match (&self.captured_context, &current_context) {
            (None, None) => true,
            _ => context::same_context(&self.captured_context, &current_context) && same_thread,
        };
        if reuse {
            let activation = self.activation;
            let holder = activation.holder().clone();
            let _ = holder.execute_with_trampoline(move || activation.succeed(value));
        } else {
            self.resume_posted(value);
        }
    }

    /// Resumes via the captured context, else the worker pool.
    pub(crate) fn resume_posted(self, value: T) {
        let activation = self.activation;
        let holder = activation.holder().clone();
        holder.post_or_queue_with_trampoline(&self.captured_context, move || {
            activation.succeed(value)
        });
    }
}

struct CellState<T> {
    result: Option<T>,
    closed: bool,
    waiters: SmallVec<[SuspendedCont<T>; 1]>,
    gate: Option<Arc<ManualResetGate>>,
}

enum Peek<T> {
    Ready(T),
    Closed,
    Parked,
}

/// A one-shot store bridging asynchronous completion with waiting
/// computations. Cheap to clone; clones share the cell.
pub struct ResultCell<T> {
    state: Arc<Mutex<CellState<T>>>,
}

impl<T> Clone for ResultCell<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Value + Clone> ResultCell<T> {
    /// Creates an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CellState {
                result: None,
                closed: false,
                waiters: SmallVec::new(),
                gate: None,
            })),
        }
    }

    /// Returns `true` once a result has been stored.
    #[must_use]
    pub fn result_available(&self) -> bool {
        self.state.lock().result.is_some()
    }

    /// Stores the result and resumes all waiters. At most one call wins;
    /// later calls are no-ops.
    ///
    /// With `reuse_thread` and exactly one waiter, the waiter resumes on
    /// the calling thread (possibly synchronously on this stack);
    /// otherwise each waiter is resumed by post-or-queue.
    pub fn register_result(&self, value: T, reuse_thread: bool) {
        let waiters = {
            let mut state = self.state.lock();
            if state.closed || state.result.is_some() {
                trace!("duplicate register_result dropped");
                return;
            }
            state.result = Some(value.clone());
            if let Some(gate) = &state.gate {
                gate.set();
            }
            std::mem::take(&mut state.waiters)
        };
        if waiters.is_empty() {
            return;
        }
        if waiters.len() == 1 && reuse_thread {
            for waiter in waiters {
                waiter.resume_immediate(value.clone());
            }
            return;
        }
        for waiter in waiters {
            waiter.resume_posted(value.clone());
        }
    }

    /// A computation that yields the cell's result.
    ///
    /// If the result is present when invoked, the success continuation
    /// runs immediately; otherwise the activation is appended to the
    /// waiter list and the step parks.
    pub fn await_result(&self) -> Computation<T> {
        let cell = self.clone();
        Computation::new(move |ctxt| {
            let peek = {
                let mut state = cell.state.lock();
                if let Some(value) = state.result.clone() {
                    Peek::Ready(value)
                } else if state.closed {
                    Peek::Closed
                } else {
                    state.waiters.push(SuspendedCont::capture(ctxt.clone()));
                    Peek::Parked
                }
            };
            match peek {
                Peek::Ready(value) => ctxt.succeed(value),
                Peek::Closed => {
                    ctxt.fail(Fault::new("result cell closed before a result was delivered"))
                }
                Peek::Parked => Step::done(),
            }
        })
    }

    /// Blocks until the result is present, up to `timeout` when given.
    ///
    /// Materializes the wait gate on first use. Returns `None` on timeout
    /// or if the cell was closed without a result.
    pub fn try_wait_synchronously(&self, timeout: Option<Duration>) -> Option<T> {
        let gate = {
            let mut state = self.state.lock();
            if let Some(value) = state.result.clone() {
                return Some(value);
            }
            if state.closed {
                return None;
            }
            Arc::clone(
                state
                    .gate
                    .get_or_insert_with(|| Arc::new(ManualResetGate::new(false))),
            )
        };
        let signalled = match timeout {
            None => {
                gate.wait();
                true
            }
            Some(timeout) => gate.wait_timeout(timeout),
        };
        if !signalled {
            return None;
        }
        self.state.lock().result.clone()
    }

    /// The cell's wait gate, created signalled iff a result is already
    /// present. Idempotent.
    #[must_use]
    pub fn wait_gate(&self) -> Arc<ManualResetGate> {
        let mut state = self.state.lock();
        let already_filled = state.result.is_some();
        Arc::clone(
            state
                .gate
                .get_or_insert_with(|| Arc::new(ManualResetGate::new(already_filled))),
        )
    }

    /// Closes the cell and drops the wait gate. Subsequent
    /// `register_result` calls are no-ops.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.gate = None;
    }
}

impl<T: Value + Clone> Default for ResultCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ResultCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResultCell")
            .field("filled", &state.result.is_some())
            .field("closed", &state.closed)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
