//! Three-valued outcome of running a computation.
//!
//! [`AsyncOutcome`] is the terminal result written into result cells and
//! task handles: `Ok(T)`, `Faulted(Fault)`, or `Cancelled(Cancelled)`.
//! Outcomes carry a severity order (`Ok < Faulted < Cancelled`); on
//! compound exit paths cancellation dominates, which is why try/finally
//! lets cancellation win over a compensation fault.

use crate::cancel::Cancelled;
use crate::error::RunError;
use crate::fault::Fault;

/// The outcome of a completed computation.
#[derive(Debug, Clone)]
pub enum AsyncOutcome<T> {
    /// The success continuation delivered a value.
    Ok(T),
    /// The exception continuation delivered a fault.
    Faulted(Fault),
    /// The cancellation continuation delivered a signal.
    Cancelled(Cancelled),
}

impl<T> AsyncOutcome<T> {
    /// Severity of this outcome (0 = Ok, 2 = Cancelled).
    #[must_use]
    pub const fn severity(&self) -> u8 {
        match self {
            Self::Ok(_) => 0,
            Self::Faulted(_) => 1,
            Self::Cancelled(_) => 2,
        }
    }

    /// Returns `true` if this outcome is `Ok`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns `true` if this outcome is `Faulted`.
    #[must_use]
    pub const fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }

    /// Returns `true` if this outcome is `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Maps the success value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> AsyncOutcome<U> {
        match self {
            Self::Ok(v) => AsyncOutcome::Ok(f(v)),
            Self::Faulted(fault) => AsyncOutcome::Faulted(fault),
            Self::Cancelled(c) => AsyncOutcome::Cancelled(c),
        }
    }

    /// Converts to a standard `Result`, folding failure into [`RunError`].
    pub fn into_result(self) -> Result<T, RunError> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Faulted(fault) => Err(RunError::Faulted(fault)),
            Self::Cancelled(c) => Err(RunError::Cancelled(c)),
        }
    }

    /// Returns the success value or panics.
    ///
    /// # Panics
    ///
    /// Panics if the outcome is not `Ok`.
    #[track_caller]
    pub fn unwrap(self) -> T {
        match self {
            Self::Ok(v) => v,
            Self::Faulted(fault) => {
                panic!("called `AsyncOutcome::unwrap()` on a `Faulted` value: {fault}")
            }
            Self::Cancelled(c) => {
                panic!("called `AsyncOutcome::unwrap()` on a `Cancelled` value: {c}")
            }
        }
    }
}

impl<T> From<Result<T, Fault>> for AsyncOutcome<T> {
    fn from(result: Result<T, Fault>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(fault) => Self::Faulted(fault),
        }
    }
}
