//! Error types surfaced at the synchronous boundaries of the library.

use crate::cancel::Cancelled;
use crate::fault::Fault;
use core::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error returned when a synchronous wait outlives its timeout.
///
/// Surfaced only at synchronous boundaries: `run_synchronously` with a
/// timeout, and `start_child` with a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    timeout: Duration,
}

impl Elapsed {
    /// Creates an `Elapsed` error for the given timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The timeout that elapsed.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the operation timed out after {:?}", self.timeout)
    }
}

impl std::error::Error for Elapsed {}

/// The failure side of running a computation to completion.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    /// The computation delivered a fault through its exception
    /// continuation.
    #[error(transparent)]
    Faulted(Fault),
    /// The computation observed cancellation.
    #[error(transparent)]
    Cancelled(Cancelled),
    /// The synchronous wait timed out before the computation delivered.
    #[error(transparent)]
    Timeout(Elapsed),
}

impl RunError {
    /// Returns the fault, if this is a fault outcome.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Faulted(fault) => Some(fault),
            _ => None,
        }
    }

    /// Returns `true` for the cancelled variant.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns `true` for the timeout variant.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Error produced while resolving configuration from the environment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// The environment variable name.
        var: &'static str,
        /// What the variable was expected to contain.
        expected: &'static str,
        /// The raw value found.
        value: String,
    },
    /// The resolved configuration is internally inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
