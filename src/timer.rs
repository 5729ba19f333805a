//! One-shot timer driver.
//!
//! A dedicated thread owns a min-heap of `(deadline, generation)` entries
//! and fires callbacks as deadlines pass. Callbacks run on the timer
//! thread and must be small shims that hand real work to the pool or a
//! sync context; the bridges built on top obey this.

use crate::tracing_compat::trace;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

type TimerCallback = Box<dyn FnOnce() + Send>;

struct TimerEntry {
    deadline: Instant,
    generation: u64,
    cancelled: Arc<AtomicBool>,
    callback: TimerCallback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse ordering for a min-heap (earliest deadline first);
        // generation breaks ties so firing order is insertion order.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Handle to a scheduled timer.
///
/// Cancelling prevents an unfired callback from running; a callback that
/// already ran is unaffected.
#[derive(Clone, Debug)]
pub(crate) struct TimerKey {
    cancelled: Arc<AtomicBool>,
}

impl TimerKey {
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct TimerDriver {
    heap: Mutex<BinaryHeap<TimerEntry>>,
    condvar: Condvar,
    next_generation: AtomicU64,
}

impl TimerDriver {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerKey {
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = TimerEntry {
            deadline: Instant::now() + delay,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            cancelled: Arc::clone(&cancelled),
            callback,
        };
        let mut heap = self.heap.lock();
        heap.push(entry);
        self.condvar.notify_one();
        drop(heap);
        TimerKey { cancelled }
    }

    fn run(&self) {
        let mut heap = self.heap.lock();
        loop {
            let now = Instant::now();
            let mut due = Vec::new();
            while heap.peek().is_some_and(|entry| entry.deadline <= now) {
                if let Some(entry) = heap.pop() {
                    due.push(entry);
                }
            }
            if !due.is_empty() {
                drop(heap);
                for entry in due {
                    if entry.cancelled.load(Ordering::Acquire) {
                        trace!("skipping cancelled timer");
                        continue;
                    }
                    (entry.callback)();
                }
                heap = self.heap.lock();
                continue;
            }
            match heap.peek().map(|entry| entry.deadline) {
                Some(deadline) => {
                    let _ = self.condvar.wait_until(&mut heap, deadline);
                }
                None => self.condvar.wait(&mut heap),
            }
        }
    }
}

fn driver() -> &'static Arc<TimerDriver> {
    static DRIVER: OnceLock<Arc<TimerDriver>> = OnceLock::new();
    DRIVER.get_or_init(|| {
        let driver = Arc::new(TimerDriver {
            heap: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            next_generation: AtomicU64::new(0),
        });
        let runner = Arc::clone(&driver);
        thread::Builder::new()
            .name("continuo-timer".to_string())
            .spawn(move || runner.run())
            .expect("failed to spawn timer thread");
        driver
    })
}

/// Schedules `callback` to fire once after `delay`.
pub(crate) fn schedule(delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerKey {
    driver().schedule(delay, Box::new(callback))
}
