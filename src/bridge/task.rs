//! Awaiting started task handles.

use crate::computation::{Computation, Value};
use crate::run::{await_outcome, TaskHandle};

/// Suspends until `handle` completes, yielding its value.
///
/// A faulted task re-surfaces through the exception continuation. When
/// `cancel_as_fault` is set, a cancelled task surfaces as a fault too;
/// otherwise it flows to the cancellation continuation.
pub fn await_task<T: Value + Clone>(
    handle: &TaskHandle<T>,
    cancel_as_fault: bool,
) -> Computation<T> {
    await_outcome(handle.cell(), cancel_as_fault)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelSource, CancelToken};
    use crate::fault::Fault;
    use crate::ops;
    use crate::run::{run_synchronously, start_as_task};
    use std::thread;
    use std::time::Duration;

    fn token() -> CancelToken {
        CancelSource::new().token()
    }

    fn slow_value(delay_ms: u64, value: u32) -> Computation<u32> {
        ops::delay(move || {
            thread::sleep(Duration::from_millis(delay_ms));
            ops::pure(value)
        })
    }

    #[test]
    fn awaits_a_completed_task() {
        let handle = start_as_task(&ops::pure(3), Some(token()));
        let _ = handle.join();
        let comp = await_task(&handle, false);
        assert_eq!(run_synchronously(&comp, None, Some(token())).expect("ok"), 3);
    }

    #[test]
    fn awaits_a_task_still_running() {
        let handle = start_as_task(&slow_value(30, 12), Some(token()));
        let comp = await_task(&handle, false);
        assert_eq!(run_synchronously(&comp, None, Some(token())).expect("ok"), 12);
    }

    #[test]
    fn faulted_task_faults_the_awaiter() {
        let handle = start_as_task(&ops::raise::<u32>(Fault::new("task broke")), Some(token()));
        let comp = await_task(&handle, false);
        let err = run_synchronously(&comp, None, Some(token())).expect_err("faults");
        assert_eq!(err.fault().expect("fault").message(), "task broke");
    }

    #[test]
    fn cancelled_task_routes_by_flag() {
        let source = CancelSource::new();
        // A task that reacts to cancellation while suspended.
        let long = ops::bind(crate::bridge::sleep::sleep(Duration::from_secs(10)), |()| {
            ops::pure(1u32)
        });
        let handle = start_as_task(&long, Some(source.token()));
        thread::sleep(Duration::from_millis(20));
        source.cancel();
        let _ = handle.join();

        let as_cancel = await_task(&handle, false);
        let err = run_synchronously(&as_cancel, None, Some(token())).expect_err("cancelled");
        assert!(err.is_cancelled());

        let as_fault = await_task(&handle, true);
        let err = run_synchronously(&as_fault, None, Some(token())).expect_err("faults");
        assert!(err.fault().is_some());
    }
}
