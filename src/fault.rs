//! Fault values with preserved capture sites.
//!
//! A [`Fault`] is the unit of failure flowing through a computation's
//! exception continuation. It is cheap to clone (`Arc`-shared) and carries
//! the *site* where it was captured: the source location of the
//! constructor call plus a [`Backtrace`] taken at that point.
//!
//! Panics raised by user code inside a computation are converted to faults
//! at the `protect` boundary, so a panic and an explicitly raised fault
//! travel the same path.
//!
//! # Site preservation across stripping boundaries
//!
//! Some boundaries reduce a fault to a bare `Arc<dyn Error>` (foreign APIs,
//! error-chain plumbing). A process-wide weak-keyed association table maps
//! source-error object identity to the site captured when the fault was
//! first dispatched, so [`Fault::from_error`] can restore the original
//! site instead of minting a fresh one. The table holds weak references
//! only and is pruned as entries die.

use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, OnceLock, Weak};

type SharedError = Arc<dyn StdError + Send + Sync>;

/// Where a fault was captured: constructor location plus backtrace.
#[derive(Clone)]
pub struct FaultSite {
    location: Option<&'static Location<'static>>,
    backtrace: Option<Arc<Backtrace>>,
}

impl FaultSite {
    /// Captures the caller's location and a backtrace.
    #[track_caller]
    #[must_use]
    pub fn capture() -> Self {
        Self {
            location: Some(Location::caller()),
            backtrace: Some(Arc::new(Backtrace::capture())),
        }
    }

    /// A site with no capture information.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            location: None,
            backtrace: None,
        }
    }

    /// The source location of the capturing constructor call, if known.
    #[must_use]
    pub fn location(&self) -> Option<&'static Location<'static>> {
        self.location
    }

    /// The backtrace taken at capture time, if any.
    #[must_use]
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_deref()
    }
}

impl fmt::Debug for FaultSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "FaultSite({}:{})", loc.file(), loc.line()),
            None => write!(f, "FaultSite(unknown)"),
        }
    }
}

struct FaultInner {
    message: String,
    source: Option<SharedError>,
    site: FaultSite,
}

/// A failure value routed through the exception continuation.
#[derive(Clone)]
pub struct Fault {
    inner: Arc<FaultInner>,
}

impl Fault {
    /// Creates a fault with the given message, capturing the caller's site.
    #[track_caller]
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_site(message, FaultSite::capture())
    }

    /// Creates a fault wrapping a source error, capturing the caller's site.
    ///
    /// The source-error object is associated with the captured site in the
    /// process-wide table so the site survives boundaries that strip the
    /// fault down to the bare error.
    #[track_caller]
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        let site = FaultSite::capture();
        let source: SharedError = Arc::new(source);
        associate(&source, site.clone());
        Self {
            inner: Arc::new(FaultInner {
                message: message.into(),
                source: Some(source),
                site,
            }),
        }
    }

    fn with_site(message: impl Into<String>, site: FaultSite) -> Self {
        Self {
            inner: Arc::new(FaultInner {
                message: message.into(),
                source: None,
                site,
            }),
        }
    }

    /// Rebuilds a fault from a bare shared error.
    ///
    /// If the error is itself a [`Fault`], it is returned unchanged. If the
    /// object was previously associated with a capture site, that site is
    /// restored; otherwise the fault gets an unknown site.
    #[must_use]
    pub fn from_error(err: SharedError) -> Self {
        if let Some(fault) = err.downcast_ref::<Fault>() {
            return fault.clone();
        }
        let site = recall(&err).unwrap_or_else(FaultSite::unknown);
        let message = err.to_string();
        Self {
            inner: Arc::new(FaultInner {
                message,
                source: Some(err),
                site,
            }),
        }
    }

    /// Converts a caught panic payload into a fault.
    ///
    /// A payload that is itself a fault (from [`Fault::escalate`]) comes
    /// back identical, preserving its site.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<Fault>() {
            Ok(fault) => return *fault,
            Err(other) => other,
        };
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::with_site(format!("panic: {message}"), FaultSite::capture())
    }

    /// The fault message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// The capture site.
    #[must_use]
    pub fn site(&self) -> &FaultSite {
        &self.inner.site
    }

    /// The wrapped source error, shared.
    #[must_use]
    pub fn source_error(&self) -> Option<SharedError> {
        self.inner.source.clone()
    }

    /// Returns `true` if both handles refer to the same fault object.
    #[must_use]
    pub fn same_fault(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Re-raises this fault as a panic carrying the fault itself.
    ///
    /// Catching the panic and converting back via [`Fault::from_panic`]
    /// yields the identical fault, site included.
    pub fn escalate(&self) -> ! {
        std::panic::resume_unwind(Box::new(self.clone()))
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.message)
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("message", &self.inner.message)
            .field("site", &self.inner.site)
            .field("has_source", &self.inner.source.is_some())
            .finish()
    }
}

impl StdError for Fault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// A fault paired with its capture site for faithful re-delivery.
///
/// This is the value handed to dispatch-info-aware runners; it also records
/// the fault's source-error association so the site survives re-raise
/// boundaries that strip it.
#[derive(Clone, Debug)]
pub struct FaultDispatchInfo {
    fault: Fault,
    site: FaultSite,
}

impl FaultDispatchInfo {
    /// Captures dispatch info for a fault and records its association.
    #[must_use]
    pub fn capture(fault: &Fault) -> Self {
        if let Some(source) = fault.source_error() {
            associate(&source, fault.site().clone());
        }
        Self {
            fault: fault.clone(),
            site: fault.site().clone(),
        }
    }

    /// The fault this info was captured from.
    #[must_use]
    pub fn source_fault(&self) -> Fault {
        self.fault.clone()
    }

    /// The preserved capture site.
    #[must_use]
    pub fn site(&self) -> &FaultSite {
        &self.site
    }
}

struct SiteEntry {
    alive: Weak<dyn StdError + Send + Sync>,
    site: FaultSite,
}

fn table() -> &'static Mutex<HashMap<usize, SiteEntry>> {
    static TABLE: OnceLock<Mutex<HashMap<usize, SiteEntry>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn key_of(err: &SharedError) -> usize {
    Arc::as_ptr(err).cast::<()>() as usize
}

// Prune dead entries once the table crosses this size.
const PRUNE_THRESHOLD: usize = 64;

/// Associates an error object with a capture site.
fn associate(err: &SharedError, site: FaultSite) {
    let mut table = table().lock();
    if table.len() >= PRUNE_THRESHOLD {
        table.retain(|_, entry| entry.alive.strong_count() > 0);
        trace!("pruned dead fault-site associations");
    }
    table.insert(
        key_of(err),
        SiteEntry {
            alive: Arc::downgrade(err),
            site,
        },
    );
}

/// Looks up the capture site previously associated with an error object.
fn recall(err: &SharedError) -> Option<FaultSite> {
    let table = table().lock();
    let entry = table.get(&key_of(err))?;
    // The key is an address; make sure the entry is for this object and
    // not a recycled allocation.
    let alive = entry.alive.upgrade()?;
    if Arc::ptr_eq(&alive, err) {
        Some(entry.site.clone())
    } else {
        None
    }
}

#[cfg(test)]
pub(crate) fn association_count() -> usize {
    table().lock().len()
}
