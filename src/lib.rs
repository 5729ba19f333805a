//! Continuo: continuation-passing asynchronous computations for Rust.
//!
//! # Overview
//!
//! A [`Computation<T>`] is a first-class description of a non-blocking
//! computation: a deferred function over an activation carrying three
//! continuations (success, fault, cancellation) plus ambient context.
//! Computations compose with sequencing, exception handling, structured
//! parallelism, and cooperative cancellation, and execute against
//! multiple scheduling strategies: the current thread, the worker pool, a
//! dedicated thread, or a host-provided synchronization context. The core
//! consumes completion callbacks from arbitrary sources; it depends on no
//! particular I/O reactor.
//!
//! # Core guarantees
//!
//! - **Bounded stacks**: a per-thread trampoline detaches continuations
//!   past a fixed bind budget, so arbitrarily long chains cannot overflow
//! - **One delivery**: every completion path is guarded by one-shot
//!   gates; double-invoking a terminal continuation fails hard
//! - **Cooperative cancellation**: every primitive checks the ambient
//!   token before user code runs; fan-out combinators link child
//!   cancellation to the parent
//! - **No lost faults**: user code runs under a protect boundary that
//!   captures panics with their site and routes them through the
//!   exception continuation
//!
//! # Module structure
//!
//! - [`computation`]: the computation value and payload bound
//! - [`ops`]: primitive combinators (return, bind, delay, loops, try,
//!   using, context switches)
//! - [`builder`]: the forwarding constructor surface
//! - [`run`]: runners (synchronous, background, task, continuations)
//! - [`combinator`]: parallel / choice / child fan-out
//! - [`bridge`]: interop with external completion sources
//! - [`cell`]: one-shot result cells and suspended continuations
//! - [`cancel`]: cancellation sources, tokens, linked sub-sources
//! - [`fault`]: fault values with preserved capture sites
//! - [`outcome`]: the three-valued terminal outcome
//! - [`gate`]: latches and manual-reset gates
//! - [`context`]: host synchronization contexts
//! - [`config`]: worker pool configuration
//! - [`error`]: boundary error types
//! - [`observability`][tracing_compat]: structured logging shims
//!
//! # Example
//!
//! ```
//! use continuo::{ops, run_synchronously};
//!
//! let computation = ops::bind(ops::pure(2), |x| ops::pure(x + 3));
//! let value = run_synchronously(&computation, None, None).unwrap();
//! assert_eq!(value, 5);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

mod activation;
mod pool;
mod timer;
mod trampoline;

pub mod bridge;
pub mod builder;
pub mod cancel;
pub mod cell;
pub mod combinator;
pub mod computation;
pub mod config;
pub mod context;
pub mod error;
pub mod fault;
pub mod gate;
pub mod ops;
pub mod outcome;
pub mod run;
pub mod test_utils;
pub mod tracing_compat;

pub use bridge::{
    as_begin_end, await_event, await_gate, await_io_result, await_task, from_begin_end,
    from_continuations, on_cancel, sleep, BeginEnd, CancelGuard, CancelHandle, EventSource,
    FaultHandle, IoPending, SuccessHandle,
};
pub use builder::ComputationBuilder;
pub use cancel::{
    cancel_default_token, default_token, CancelSource, CancelToken, Cancelled, LinkedSource,
    Registration,
};
pub use cell::ResultCell;
pub use combinator::{choice, parallel, start_child};
pub use computation::{Computation, Value};
pub use config::PoolConfig;
pub use context::SyncContext;
pub use error::{ConfigError, Elapsed, RunError};
pub use fault::{Fault, FaultDispatchInfo, FaultSite};
pub use gate::{Latch, ManualResetGate, OnceAction};
pub use ops::Disposable;
pub use outcome::AsyncOutcome;
pub use run::{
    run_synchronously, start, start_as_task, start_immediate, start_immediate_as_task,
    start_with_continuations, start_with_continuations_dispatch_info, TaskHandle,
};
