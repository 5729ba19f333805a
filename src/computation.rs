//! First-class deferred computations.
//!
//! A [`Computation<T>`] wraps a single operation: given an activation for
//! `T`, run zero or more synchronous steps and either invoke one of the
//! activation's continuations or park the activation to be resumed by an
//! external event. Computations are values: cheap to clone, re-runnable,
//! and inert until a runner supplies an activation.

use crate::activation::{Activation, Step};
use std::fmt;
use std::sync::Arc;

/// Bound satisfied by every payload a computation can carry: the value
/// travels between threads inside continuations and shared closures.
pub trait Value: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Value for T {}

/// An opaque deferred computation producing `T`.
pub struct Computation<T> {
    run: Arc<dyn Fn(Activation<T>) -> Step + Send + Sync>,
}

impl<T> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<T: Value> Computation<T> {
    pub(crate) fn new(run: impl Fn(Activation<T>) -> Step + Send + Sync + 'static) -> Self {
        Self { run: Arc::new(run) }
    }

    /// Runs one step of this computation against `activation`.
    pub(crate) fn invoke(&self, activation: Activation<T>) -> Step {
        (*self.run)(activation)
    }

    /// Maps the produced value. Forwards to [`crate::ops::map`].
    pub fn map<U: Value>(&self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Computation<U> {
        crate::ops::map(self.clone(), f)
    }

    /// Sequences a continuation computation. Forwards to
    /// [`crate::ops::bind`].
    pub fn and_then<U: Value>(
        &self,
        f: impl Fn(T) -> Computation<U> + Send + Sync + 'static,
    ) -> Computation<U> {
        crate::ops::bind(self.clone(), f)
    }

    /// Discards the produced value. Forwards to [`crate::ops::ignore`].
    pub fn ignore(&self) -> Computation<()> {
        crate::ops::ignore(self.clone())
    }
}

impl<T> fmt::Debug for Computation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Computation")
    }
}
