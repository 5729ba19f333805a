//! Host synchronization contexts.
//!
//! A [`SyncContext`] posts callbacks back onto a specific execution
//! environment (a UI thread, a single-threaded event pump). The library
//! never requires one: when no context is current, work that would be
//! posted is queued on the worker pool instead.
//!
//! The *current* context is a thread-local slot. Identity is pointer
//! equality on the `Arc`, which is what the immediate-resumption rule of
//! suspended continuations consults.

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A host-provided execution environment that can run posted callbacks.
pub trait SyncContext: Send + Sync {
    /// Posts a work item to run on this context.
    fn post(&self, job: Box<dyn FnOnce() + Send>);
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn SyncContext>>> = const { RefCell::new(None) };
}

/// Returns the current thread's synchronization context, if any.
#[must_use]
pub fn current() -> Option<Arc<dyn SyncContext>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Replaces the current thread's context, returning the previous one.
pub fn set_current(context: Option<Arc<dyn SyncContext>>) -> Option<Arc<dyn SyncContext>> {
    CURRENT.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), context))
}

/// Installs `context` as current for the guard's lifetime.
pub fn enter(context: Arc<dyn SyncContext>) -> ContextGuard {
    ContextGuard {
        previous: set_current(Some(context)),
    }
}

/// Restores the previously current context on drop.
pub struct ContextGuard {
    previous: Option<Arc<dyn SyncContext>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let _ = set_current(self.previous.take());
    }
}

/// Pointer-identity equality over optional contexts.
#[must_use]
pub fn same_context(a: &Option<Arc<dyn SyncContext>>, b: &Option<Arc<dyn SyncContext>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// A single-consumer context backed by a job queue.
///
/// One thread pumps the queue (installing itself as the current context
/// while doing so); any thread may post. This is the reference context
/// implementation used by the test suite to model a UI-style thread.
pub struct PumpContext {
    jobs: SegQueue<Box<dyn FnOnce() + Send>>,
    mutex: Mutex<()>,
    condvar: Condvar,
    stopped: AtomicBool,
}

impl PumpContext {
    /// Creates a context with an empty queue.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: SegQueue::new(),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Requests the pump loop to exit once the queue is drained.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }

    /// Pumps jobs on the calling thread until [`stop`](Self::stop) is
    /// called and the queue is empty.
    ///
    /// The context installs itself as the thread's current context for the
    /// duration of the pump.
    pub fn run(self: &Arc<Self>) {
        let _guard = enter(Arc::clone(self) as Arc<dyn SyncContext>);
        loop {
            while let Some(job) = self.jobs.pop() {
                job();
            }
            if self.stopped.load(Ordering::Acquire) {
                return;
            }
            let mut guard = self.mutex.lock();
            // Re-check under the lock so a post between pop and park is
            // not missed.
            if self.jobs.is_empty() && !self.stopped.load(Ordering::Acquire) {
                self.condvar.wait(&mut guard);
            }
        }
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }
}

impl SyncContext for PumpContext {
    fn post(&self, job: Box<dyn FnOnce() + Send>) {
        self.jobs.push(job);
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

impl std::fmt::Debug for PumpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PumpContext")
            .field("pending", &self.jobs.len())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}
