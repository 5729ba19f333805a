//! Structured concurrency combinators.
//!
//! All fan-out combinators share one shape: snapshot the children, derive
//! a linked cancellation sub-source, queue each child on the pool under
//! the derived token, and deliver exactly one outcome to the parent
//! activation on the sync context captured at the combinator call. The
//! first failure wins a CAS gate and cancels the sub-source before the
//! final delivery, so no sibling can slip a success in afterwards.

pub mod child;
pub mod choice;
pub mod parallel;

pub use child::start_child;
pub use choice::choice;
pub use parallel::parallel;
