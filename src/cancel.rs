//! Cooperative cancellation: sources, tokens, registrations, linked
//! sub-sources.
//!
//! Cancellation is a first-class signal, not a silent drop. A
//! [`CancelSource`] owns the trigger; its [`CancelToken`]s are cheap clones
//! observed by every primitive combinator before user code runs. Callbacks
//! registered on a token fire exactly once, on the cancelling thread; a
//! registration on an already-cancelled token fires synchronously on the
//! registering thread, so all callbacks must be safe under same-thread
//! reentrancy (the gates in [`crate::gate`] exist for this).
//!
//! [`LinkedSource`] derives a child source cancelled when either the parent
//! token or its own trigger fires. The combinator that creates a linked
//! source owns it and drops it on exactly one completion path.

use crate::tracing_compat::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

type Callback = Box<dyn FnOnce() + Send>;

struct TokenState {
    cancelled: AtomicBool,
    callbacks: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl TokenState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }
}

/// The owning side of a cancellation scope.
#[derive(Clone)]
pub struct CancelSource {
    state: Arc<TokenState>,
}

impl CancelSource {
    /// Creates a fresh, uncancelled source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: TokenState::new(),
        }
    }

    /// Returns a token observing this source.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            state: Arc::clone(&self.state),
        }
    }

    /// Returns `true` if this source has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Signals cancellation, running registered callbacks on this thread.
    ///
    /// Idempotent: only the first call runs callbacks. Callbacks execute
    /// outside the registration lock, in registration order.
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.state.callbacks.lock());
        debug!(callbacks = callbacks.len(), "cancellation signalled");
        for (_, callback) in callbacks {
            callback();
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSource")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// The observing side of a cancellation scope. Cheap to clone.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    /// Returns a token that can never be cancelled.
    #[must_use]
    pub fn never() -> Self {
        CancelSource::new().token()
    }

    /// Returns `true` if cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Registers a callback to run when cancellation is signalled.
    ///
    /// If the token is already cancelled the callback runs synchronously on
    /// the calling thread before this returns. Dropping the returned
    /// [`Registration`] removes an unfired callback.
    pub fn register(&self, callback: impl FnOnce() + Send + 'static) -> Registration {
        if self.is_cancelled() {
            trace!("registration on cancelled token fires reentrantly");
            callback();
            return Registration::inert();
        }
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.callbacks.lock().push((id, Box::new(callback)));
        // The source may have drained callbacks between the check and the
        // push; reclaim our entry and fire it here if so.
        if self.is_cancelled() {
            let reclaimed = {
                let mut callbacks = self.state.callbacks.lock();
                callbacks
                    .iter()
                    .position(|(entry_id, _)| *entry_id == id)
                    .map(|pos| callbacks.remove(pos).1)
            };
            if let Some(callback) = reclaimed {
                callback();
            }
            return Registration::inert();
        }
        Registration {
            state: Arc::downgrade(&self.state),
            id,
        }
    }

    /// Returns `true` if both tokens observe the same source.
    #[must_use]
    pub fn same_token(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Handle for a registered cancellation callback.
///
/// Dropping it deregisters the callback if it has not fired.
pub struct Registration {
    state: Weak<TokenState>,
    id: u64,
}

impl Registration {
    fn inert() -> Self {
        Self {
            state: Weak::new(),
            id: 0,
        }
    }

    /// Explicitly removes the callback. Equivalent to dropping.
    pub fn dispose(self) {}
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            let mut callbacks = state.callbacks.lock();
            if let Some(pos) = callbacks.iter().position(|(id, _)| *id == self.id) {
                callbacks.remove(pos);
            }
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

/// The cancellation signal delivered to a computation's cancellation
/// continuation, carrying the token that fired.
#[derive(Clone)]
pub struct Cancelled {
    token: CancelToken,
}

impl Cancelled {
    /// Creates a signal for the given token.
    #[must_use]
    pub fn new(token: CancelToken) -> Self {
        Self { token }
    }

    /// The token that was cancelled.
    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl fmt::Debug for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancelled").finish()
    }
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the computation was cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// A cancellation source linked to a parent token.
///
/// Its token is cancelled when either the parent token or [`cancel`]
/// (the internal trigger) fires. Dropping the linked source detaches it
/// from the parent.
///
/// [`cancel`]: LinkedSource::cancel
pub struct LinkedSource {
    source: CancelSource,
    _parent: Registration,
}

impl LinkedSource {
    /// Links a new source to `parent`.
    #[must_use]
    pub fn new(parent: &CancelToken) -> Self {
        let source = CancelSource::new();
        let trigger = source.clone();
        let parent_reg = parent.register(move || trigger.cancel());
        Self {
            source,
            _parent: parent_reg,
        }
    }

    /// The derived token.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        self.source.token()
    }

    /// Fires the internal trigger.
    pub fn cancel(&self) {
        self.source.cancel();
    }
}

impl fmt::Debug for LinkedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedSource")
            .field("cancelled", &self.source.is_cancelled())
            .finish()
    }
}

fn default_slot() -> &'static RwLock<CancelSource> {
    static SLOT: OnceLock<RwLock<CancelSource>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(CancelSource::new()))
}

/// The process-wide default cancellation token, used by runners when no
/// token is supplied.
#[must_use]
pub fn default_token() -> CancelToken {
    default_slot().read().token()
}

/// Cancels the current default token and installs a fresh default source.
///
/// The replacement source is published before the old one is cancelled, so
/// the default token is never observed in a cancelled steady state.
pub fn cancel_default_token() {
    let old = {
        let mut slot = default_slot().write();
        std::mem::replace(&mut *slot, CancelSource::new())
    };
    old.cancel();
}
