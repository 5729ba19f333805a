//! Trampolines bound synchronous continuation recursion.
//!
//! Every continuation invocation goes through [`TrampolineHolder::hijack`]:
//! a per-step bind counter is incremented and, once it crosses
//! [`BIND_LIMIT`], the pending continuation is detached into the
//! trampoline's single storage slot instead of being called. The enclosing
//! [`execute_with_trampoline`] loop picks it up and re-invokes it
//! iteratively, so arbitrarily long bind chains use bounded stack.
//!
//! Within one execute scope, at any instant either a continuation is
//! running synchronously or exactly one is pending in the slot. A thread
//! can observe nested execute scopes (different holders); the thread-local
//! flag marks only whether *some* trampoline is active on this thread.
//!
//! [`execute_with_trampoline`]: TrampolineHolder::execute_with_trampoline

use crate::activation::Step;
use crate::context::SyncContext;
use crate::pool;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::Arc;
use std::thread;

/// Bind steps allowed before a continuation is detached onto a new step.
pub(crate) const BIND_LIMIT: u32 = 300;

thread_local! {
    static RUNNING: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` while an execute scope is active on this thread.
pub(crate) fn thread_running_trampoline() -> bool {
    RUNNING.with(Cell::get)
}

type StoredCont = Box<dyn FnOnce() -> Step + Send>;

#[derive(Default)]
struct Trampoline {
    bind_count: u32,
    stored: Option<StoredCont>,
}

/// Owns the trampoline for a computation and exposes the scheduling
/// primitives that re-enter it. Cheap to clone.
///
/// A holder's trampoline is only ever driven by one thread at a time; the
/// mutex makes the brief hand-off windows (posted resumptions racing a
/// finishing step) safe.
#[derive(Clone)]
pub(crate) struct TrampolineHolder {
    inner: Arc<Mutex<Trampoline>>,
}

impl TrampolineHolder {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Trampoline::default())),
        }
    }

    /// Runs `first` under a fresh trampoline, then drains the storage slot
    /// until no continuation is pending.
    ///
    /// The thread-local flag is installed only if this scope is the
    /// outermost one on the thread, and reset only by the installer.
    pub(crate) fn execute_with_trampoline(&self, first: impl FnOnce() -> Step) -> Step {
        self.inner.lock().bind_count = 0;
        let installed = RUNNING.with(|flag| {
            if flag.get() {
                false
            } else {
                flag.set(true);
                true
            }
        });
        let _ = first();
        loop {
            let next = self.inner.lock().stored.take();
            match next {
                Some(cont) => {
                    let _ = cont();
                }
                None => break,
            }
        }
        if installed {
            RUNNING.with(|flag| flag.set(false));
        }
        Step::done()
    }

    fn increment_and_check(&self) -> bool {
        let mut trampoline = self.inner.lock();
        trampoline.bind_count += 1;
        trampoline.bind_count >= BIND_LIMIT
    }

    fn store(&self, cont: StoredCont) {
        let mut trampoline = self.inner.lock();
        assert!(
            trampoline.stored.is_none(),
            "a trampoline continuation is already pending"
        );
        trampoline.bind_count = 0;
        trampoline.stored = Some(cont);
    }

    /// Invokes `run` now, or parks it in the storage slot when the bind
    /// budget of the current step is exhausted.
    ///
    /// Called from a thread with no active trampoline, this opens a fresh
    /// execute scope instead, so externally-driven continuations are always
    /// drained.
    pub(crate) fn hijack(&self, run: impl FnOnce() -> Step + Send + 'static) -> Step {
        if !thread_running_trampoline() {
            return self.execute_with_trampoline(run);
        }
        if self.increment_and_check() {
            self.store(Box::new(run));
            Step::done()
        } else {
            run()
        }
    }

    /// Posts `run` to `context`; it executes there under a fresh
    /// trampoline.
    pub(crate) fn post_with_trampoline(
        &self,
        context: &Arc<dyn SyncContext>,
        run: impl FnOnce() -> Step + Send + 'static,
    ) {
        let holder = self.clone();
        context.post(Box::new(move || {
            let _ = holder.execute_with_trampoline(run);
        }));
    }

    /// Enqueues `run` on the worker pool under a fresh trampoline.
    pub(crate) fn queue_work_item_with_trampoline(
        &self,
        run: impl FnOnce() -> Step + Send + 'static,
    ) {
        let holder = self.clone();
        pool::queue_global(move || {
            let _ = holder.execute_with_trampoline(run);
        });
    }

    /// Posts to `context` when present, otherwise queues on the pool.
    pub(crate) fn post_or_queue_with_trampoline(
        &self,
        context: &Option<Arc<dyn SyncContext>>,
        run: impl FnOnce() -> Step + Send + 'static,
    ) {
        match context {
            Some(context) => self.post_with_trampoline(context, run),
            None => self.queue_work_item_with_trampoline(run),
        }
    }

    /// Starts a dedicated thread that executes `run` under a fresh
    /// trampoline.
    pub(crate) fn start_thread_with_trampoline(&self, run: impl FnOnce() -> Step + Send + 'static) {
        let holder = self.clone();
        thread::Builder::new()
            .name("continuo-dedicated".to_string())
            .spawn(move || {
                let _ = holder.execute_with_trampoline(run);
            })
            .expect("failed to spawn dedicated thread");
    }
}

impl std::fmt::Debug for TrampolineHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrampolineHolder").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn chain(holder: TrampolineHolder, remaining: u32, count: Arc<AtomicU32>) -> Step {
        if remaining == 0 {
            return Step::done();
        }
        count.fetch_add(1, Ordering::Relaxed);
        let h = holder.clone();
        holder.hijack(move || chain(h, remaining - 1, count))
    }

    #[test]
    fn execute_runs_first_action() {
        let holder = TrampolineHolder::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let _ = holder.execute_with_trampoline(move || {
            c.fetch_add(1, Ordering::Relaxed);
            Step::done()
        });
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn long_synchronous_chain_completes() {
        // Far above BIND_LIMIT; would overflow the stack without the
        // periodic detach.
        let holder = TrampolineHolder::new();
        let count = Arc::new(AtomicU32::new(0));
        let steps = BIND_LIMIT * 100;
        let h = holder.clone();
        let c = Arc::clone(&count);
        let _ = holder.execute_with_trampoline(move || chain(h, steps, c));
        assert_eq!(count.load(Ordering::Relaxed), steps);
    }

    #[test]
    fn hijack_without_scope_opens_one() {
        let holder = TrampolineHolder::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let _ = holder.hijack(move || {
            c.fetch_add(1, Ordering::Relaxed);
            Step::done()
        });
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(!thread_running_trampoline());
    }

    #[test]
    fn running_flag_cleared_after_execute() {
        let holder = TrampolineHolder::new();
        let _ = holder.execute_with_trampoline(|| {
            assert!(thread_running_trampoline());
            Step::done()
        });
        assert!(!thread_running_trampoline());
    }
}
