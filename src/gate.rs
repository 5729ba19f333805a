//! Race-safe one-shot gates.
//!
//! Three small primitives used throughout the runtime to make completion
//! paths single-winner:
//!
//! - [`Latch`]: a compare-and-swap gate that returns `true` exactly once
//!   across any number of concurrent callers.
//! - [`OnceAction`]: a latch-guarded thunk that runs at most once.
//! - [`ManualResetGate`]: a manual-reset event supporting timed synchronous
//!   waits, used as the materialized wait handle of a result cell.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A one-shot gate. `enter` returns `true` for exactly one caller.
#[derive(Debug, Default)]
pub struct Latch {
    entered: AtomicBool,
}

impl Latch {
    /// Creates a latch in the open state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entered: AtomicBool::new(false),
        }
    }

    /// Attempts to pass the gate.
    ///
    /// Returns `true` for the first caller and `false` for every caller
    /// after that, regardless of thread.
    pub fn enter(&self) -> bool {
        self.entered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `true` once some caller has passed the gate.
    #[must_use]
    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }
}

/// A thunk guarded by a [`Latch`] so it runs at most once.
pub struct OnceAction {
    latch: Latch,
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl OnceAction {
    /// Wraps `action` so that only the first `fire` call runs it.
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            latch: Latch::new(),
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// Runs the wrapped action if it has not run yet.
    ///
    /// Returns `true` if this call ran the action.
    pub fn fire(&self) -> bool {
        if !self.latch.enter() {
            return false;
        }
        // The latch winner is the only taker of the slot.
        if let Some(action) = self.action.lock().take() {
            action();
        }
        true
    }

    /// Returns `true` once the action has been fired.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.latch.is_entered()
    }
}

impl std::fmt::Debug for OnceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnceAction")
            .field("fired", &self.has_fired())
            .finish()
    }
}

/// A manual-reset event.
///
/// Once `set`, all current and future waiters are released until `reset`
/// is called. This is the synchronous wait handle lazily materialized by
/// `ResultCell`.
#[derive(Debug)]
pub struct ManualResetGate {
    state: Mutex<bool>,
    cond: Condvar,
}

impl ManualResetGate {
    /// Creates a gate, signalled iff `initially_set`.
    #[must_use]
    pub fn new(initially_set: bool) -> Self {
        Self {
            state: Mutex::new(initially_set),
            cond: Condvar::new(),
        }
    }

    /// Signals the gate, releasing all waiters.
    pub fn set(&self) {
        let mut set = self.state.lock();
        *set = true;
        self.cond.notify_all();
    }

    /// Returns the gate to the unsignalled state.
    pub fn reset(&self) {
        *self.state.lock() = false;
    }

    /// Returns `true` if the gate is currently signalled.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Blocks until the gate is signalled.
    pub fn wait(&self) {
        let mut set = self.state.lock();
        while !*set {
            self.cond.wait(&mut set);
        }
    }

    /// Blocks until the gate is signalled or `timeout` elapses.
    ///
    /// Returns `true` if the gate was signalled, `false` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = self.state.lock();
        while !*set {
            if Instant::now() >= deadline {
                return false;
            }
            let _ = self.cond.wait_until(&mut set, deadline);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn latch_enters_exactly_once() {
        let latch = Latch::new();
        assert!(latch.enter());
        assert!(!latch.enter());
        assert!(latch.is_entered());
    }

    #[test]
    fn latch_single_winner_across_threads() {
        let latch = Arc::new(Latch::new());
        let wins = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let latch = Arc::clone(&latch);
            let wins = Arc::clone(&wins);
            handles.push(thread::spawn(move || {
                if latch.enter() {
                    wins.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            h.join().expect("latch thread panicked");
        }
        assert_eq!(wins.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn once_action_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let once = OnceAction::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        });
        assert!(once.fire());
        assert!(!once.fire());
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(once.has_fired());
    }

    #[test]
    fn gate_starts_unset() {
        let gate = ManualResetGate::new(false);
        assert!(!gate.is_set());
        assert!(!gate.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn gate_set_releases_waiter() {
        let gate = Arc::new(ManualResetGate::new(false));
        let g = Arc::clone(&gate);
        let waiter = thread::spawn(move || g.wait_timeout(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        gate.set();
        assert!(waiter.join().expect("waiter panicked"));
    }

    #[test]
    fn gate_initially_set_releases_immediately() {
        let gate = ManualResetGate::new(true);
        assert!(gate.is_set());
        gate.wait();
        assert!(gate.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn gate_reset_blocks_again() {
        let gate = ManualResetGate::new(true);
        gate.reset();
        assert!(!gate.is_set());
        assert!(!gate.wait_timeout(Duration::from_millis(5)));
    }
}
