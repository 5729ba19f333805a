//! Bridges between computations and external completion sources.
//!
//! Each bridge turns some externally-scheduled callback (a timer, a wait
//! gate, an event handler, a begin/end I/O pair, a user-invoked
//! continuation) into a parked activation that resumes when the callback
//! fires. Every bridge guards its completion paths with one-shot gates so
//! racing sources (completion vs. cancellation) produce exactly one
//! delivery.

pub mod begin_end;
pub mod continuations;
pub mod event;
pub mod on_cancel;
pub mod sleep;
pub mod task;
pub mod wait;

pub use begin_end::{as_begin_end, from_begin_end, BeginEnd, IoCallback, IoOperation, IoPending};
pub use continuations::{from_continuations, CancelHandle, FaultHandle, SuccessHandle};
pub use event::{await_event, EventSource};
pub use on_cancel::{on_cancel, CancelGuard};
pub use sleep::sleep;
pub use task::await_task;
pub use wait::{await_gate, await_io_result};
