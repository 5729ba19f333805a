//! User-facing constructor surface.
//!
//! [`ComputationBuilder`] forwards to the primitive combinators in
//! [`crate::ops`]; it exists so call sites composing many steps can thread
//! one value instead of importing a dozen free functions. Declarative
//! surface syntax (macros) is deliberately out of scope.

use crate::computation::{Computation, Value};
use crate::fault::Fault;
use crate::ops::{self, Disposable};
use std::sync::Arc;

/// Builder of computations; all methods forward to the primitives.
#[derive(Clone, Copy, Debug, Default)]
pub struct ComputationBuilder;

impl ComputationBuilder {
    /// Creates a builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// A computation that succeeds with `value`.
    pub fn ret<T: Value + Clone>(&self, value: T) -> Computation<T> {
        ops::pure(value)
    }

    /// The unit computation.
    pub fn zero(&self) -> Computation<()> {
        ops::zero()
    }

    /// Defers `thunk` until the computation runs.
    pub fn delay<T: Value>(
        &self,
        thunk: impl Fn() -> Computation<T> + Send + Sync + 'static,
    ) -> Computation<T> {
        ops::delay(thunk)
    }

    /// Sequences `source` into `binder`.
    pub fn bind<T: Value, U: Value>(
        &self,
        source: Computation<T>,
        binder: impl Fn(T) -> Computation<U> + Send + Sync + 'static,
    ) -> Computation<U> {
        ops::bind(source, binder)
    }

    /// Runs `first` then `second`.
    pub fn combine<U: Value>(
        &self,
        first: Computation<()>,
        second: Computation<U>,
    ) -> Computation<U> {
        ops::combine(first, second)
    }

    /// Attaches a fault handler.
    pub fn try_with<T: Value>(
        &self,
        source: Computation<T>,
        handler: impl Fn(Fault) -> Computation<T> + Send + Sync + 'static,
    ) -> Computation<T> {
        ops::try_with(source, handler)
    }

    /// Attaches an every-exit compensation.
    pub fn try_finally<T: Value>(
        &self,
        source: Computation<T>,
        compensation: impl Fn() + Send + Sync + 'static,
    ) -> Computation<T> {
        ops::try_finally(source, compensation)
    }

    /// Scopes a disposable resource to `body`.
    pub fn using<R, T>(
        &self,
        resource: Arc<R>,
        body: impl Fn(Arc<R>) -> Computation<T> + Send + Sync + 'static,
    ) -> Computation<T>
    where
        R: Disposable + 'static,
        T: Value,
    {
        ops::using(resource, body)
    }

    /// Repeats `body` while `guard` holds.
    pub fn while_loop(
        &self,
        guard: impl Fn() -> bool + Send + Sync + 'static,
        body: Computation<()>,
    ) -> Computation<()> {
        ops::while_loop(guard, body)
    }

    /// Runs `body` over each item of `items`.
    pub fn for_each<I, T, F>(&self, items: I, body: F) -> Computation<()>
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
        F: Fn(T) -> Computation<()> + Send + Sync + 'static,
    {
        ops::for_each(items, body)
    }
}
