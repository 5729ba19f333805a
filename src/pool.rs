//! The worker pool backing queued computation steps.
//!
//! Work items are opaque closures: each one is a single trampoline-bounded
//! execution step of some computation. The pool is deliberately simple: a
//! lock-free injector queue, lazy thread spawning up to `max_threads`, and
//! idle retirement down to `min_threads`.
//!
//! A panicking work item is isolated and logged; it never takes a worker
//! down. Queueing after shutdown is a contract violation and fails hard.

use crate::config::PoolConfig;
use crate::tracing_compat::{debug, error, trace};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

type WorkItem = Box<dyn FnOnce() + Send>;

/// A shareable handle to a worker pool.
#[derive(Clone)]
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    queue: SegQueue<WorkItem>,
    active_threads: AtomicUsize,
    busy_threads: AtomicUsize,
    pending: AtomicUsize,
    shutdown: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl WorkerPool {
    /// Creates a pool and eagerly spawns `min_threads` workers.
    pub(crate) fn new(config: PoolConfig) -> Self {
        let max_threads = config.max_threads.max(config.min_threads).max(1);
        let inner = Arc::new(PoolInner {
            config: PoolConfig {
                max_threads,
                ..config
            },
            queue: SegQueue::new(),
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        });
        let pool = Self { inner };
        for _ in 0..pool.inner.config.min_threads {
            spawn_worker(&pool.inner);
        }
        pool
    }

    /// Enqueues a work item.
    ///
    /// # Panics
    ///
    /// Panics if the pool has been shut down; a rejected queue request is a
    /// misuse of the library, not a recoverable condition.
    pub(crate) fn queue(&self, work: impl FnOnce() + Send + 'static) {
        assert!(
            !self.inner.shutdown.load(Ordering::Acquire),
            "work item queued after worker pool shutdown"
        );
        self.inner.queue.push(Box::new(work));
        self.inner.pending.fetch_add(1, Ordering::Relaxed);
        maybe_spawn_worker(&self.inner);
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_one();
    }

    /// Number of queued-but-unstarted work items.
    pub(crate) fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Number of live worker threads.
    pub(crate) fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Stops accepting work and wakes all parked workers so they exit.
    #[cfg(test)]
    pub(crate) fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_all();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("active_threads", &self.active_threads())
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn spawn_worker(inner: &Arc<PoolInner>) {
    let id = inner.active_threads.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-worker-{id}", inner.config.thread_name_prefix);
    let inner = Arc::clone(inner);
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            trace!("worker thread started");
            worker_loop(&inner);
            inner.active_threads.fetch_sub(1, Ordering::Relaxed);
            trace!("worker thread retired");
        })
        .expect("failed to spawn worker thread");
}

fn maybe_spawn_worker(inner: &Arc<PoolInner>) {
    let active = inner.active_threads.load(Ordering::Relaxed);
    let busy = inner.busy_threads.load(Ordering::Relaxed);
    let pending = inner.pending.load(Ordering::Relaxed);
    if active < inner.config.max_threads && busy >= active && pending > 0 {
        spawn_worker(inner);
    }
}

fn worker_loop(inner: &Arc<PoolInner>) {
    loop {
        if let Some(work) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::Relaxed);
            inner.busy_threads.fetch_add(1, Ordering::Relaxed);
            // A panicking step must not take the worker down with it.
            if catch_unwind(AssertUnwindSafe(work)).is_err() {
                error!("work item panicked on worker thread");
            }
            inner.busy_threads.fetch_sub(1, Ordering::Relaxed);
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            return;
        }

        let active = inner.active_threads.load(Ordering::Relaxed);
        if active > inner.config.min_threads {
            let mut guard = inner.mutex.lock();
            let timed_out = inner
                .condvar
                .wait_for(&mut guard, inner.config.idle_timeout)
                .timed_out();
            drop(guard);
            if timed_out
                && inner.queue.is_empty()
                && inner.active_threads.load(Ordering::Relaxed) > inner.config.min_threads
            {
                debug!("retiring idle worker");
                return;
            }
        } else {
            let mut guard = inner.mutex.lock();
            if inner.queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
                inner.condvar.wait(&mut guard);
            }
        }
    }
}

/// The process-wide pool used by trampoline holders.
pub(crate) fn global() -> &'static WorkerPool {
    static POOL: OnceLock<WorkerPool> = OnceLock::new();
    POOL.get_or_init(|| {
        let config = PoolConfig::from_env().unwrap_or_else(|_err| {
            error!("invalid pool configuration in environment, using defaults");
            PoolConfig::default()
        });
        debug!(
            min = config.min_threads,
            max = config.max_threads,
            "initializing global worker pool"
        );
        WorkerPool::new(config)
    })
}

/// Enqueues a work item on the global pool.
pub(crate) fn queue_global(work: impl FnOnce() + Send + 'static) {
    global().queue(work);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::time::Duration;

    fn small_pool() -> WorkerPool {
        WorkerPool::new(PoolConfig {
            min_threads: 1,
            max_threads: 4,
            thread_name_prefix: "pool-test".to_string(),
            idle_timeout: Duration::from_millis(50),
        })
    }

    #[test]
    fn runs_queued_work() {
        let pool = small_pool();
        let counter = Arc::new(AtomicI32::new(0));
        let gate = Arc::new(crate::gate::ManualResetGate::new(false));

        let c = Arc::clone(&counter);
        let g = Arc::clone(&gate);
        pool.queue(move || {
            c.fetch_add(1, Ordering::SeqCst);
            g.set();
        });

        assert!(gate.wait_timeout(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runs_many_items_from_many_threads() {
        let pool = small_pool();
        let counter = Arc::new(AtomicI32::new(0));
        let mut spawners = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let counter = Arc::clone(&counter);
            spawners.push(thread::spawn(move || {
                for _ in 0..50 {
                    let c = Arc::clone(&counter);
                    pool.queue(move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    });
                }
            }));
        }
        for s in spawners {
            s.join().expect("spawner panicked");
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 200 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn panicking_item_does_not_kill_the_pool() {
        let pool = small_pool();
        pool.queue(|| panic!("intentional"));

        let gate = Arc::new(crate::gate::ManualResetGate::new(false));
        let g = Arc::clone(&gate);
        pool.queue(move || g.set());
        assert!(gate.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    #[should_panic(expected = "queued after worker pool shutdown")]
    fn queue_after_shutdown_fails_hard() {
        let pool = small_pool();
        pool.shutdown();
        pool.queue(|| {});
    }

    #[test]
    fn excess_workers_retire_when_idle() {
        let pool = small_pool();
        let gate = Arc::new(crate::gate::ManualResetGate::new(false));
        for _ in 0..8 {
            let g = Arc::clone(&gate);
            pool.queue(move || {
                let _ = g.wait_timeout(Duration::from_millis(100));
            });
        }
        thread::sleep(Duration::from_millis(20));
        gate.set();
        // Give idle workers time to pass their retirement timeout.
        thread::sleep(Duration::from_millis(400));
        assert!(pool.active_threads() <= 2);
    }
}
