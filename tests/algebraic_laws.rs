//! Algebraic laws of the primitive combinators.
//!
//! The laws are checked observationally: two computations are considered
//! equivalent when running them commits the same outcome.

use continuo::test_utils::init_test_logging;
use continuo::{ops, run_synchronously, CancelSource, CancelToken, Computation, Fault};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

fn token() -> CancelToken {
    CancelSource::new().token()
}

fn run<T: continuo::Value + Clone + std::fmt::Debug + PartialEq>(
    computation: &Computation<T>,
) -> Result<T, String> {
    run_synchronously(computation, None, Some(token())).map_err(|err| err.to_string())
}

#[test]
fn bind_left_identity() {
    init_test_logging();
    let f = |x: i32| ops::pure(x * 2);
    let lhs = ops::bind(ops::pure(21), f);
    let rhs = f(21);
    assert_eq!(run(&lhs), run(&rhs));
}

#[test]
fn bind_right_identity() {
    init_test_logging();
    let m = ops::bind(ops::pure(10), |x| ops::pure(x + 1));
    let lhs = ops::bind(m.clone(), ops::pure);
    assert_eq!(run(&lhs), run(&m));
}

#[test]
fn bind_associativity() {
    init_test_logging();
    let m = ops::pure(3);
    let f = |x: i32| ops::pure(x + 10);
    let g = |x: i32| ops::pure(x * 2);

    let lhs = ops::bind(ops::bind(m.clone(), f), g);
    let rhs = ops::bind(m, move |x| ops::bind(f(x), g));
    assert_eq!(run(&lhs), run(&rhs));
    assert_eq!(run(&lhs).expect("ok"), 26);
}

#[test]
fn raise_then_catch_is_identity_on_the_fault() {
    init_test_logging();
    let fault = Fault::new("round trip");
    let computation = ops::catch(ops::raise::<i32>(fault.clone()));
    let caught = run_synchronously(&computation, None, Some(token()))
        .expect("catch reifies")
        .expect_err("fault side");
    assert!(caught.same_fault(&fault));
}

#[test]
fn catch_of_success_is_ok() {
    init_test_logging();
    let computation = ops::catch(ops::pure(9));
    let value = run_synchronously(&computation, None, Some(token())).expect("ok");
    assert_eq!(value.expect("ok side"), 9);
}

#[test]
fn sequential_runs_in_order() {
    init_test_logging();
    let order = Arc::new(AtomicU32::new(0));
    let first = Arc::clone(&order);
    let second = Arc::clone(&order);
    let computation = ops::sequential(
        ops::delay(move || {
            // 0 -> 1 must happen before the second step observes it.
            let _ = first.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);
            ops::zero()
        }),
        ops::delay(move || {
            let _ = second.compare_exchange(1, 2, Ordering::SeqCst, Ordering::SeqCst);
            ops::zero()
        }),
    );
    run_synchronously(&computation, None, Some(token())).expect("ok");
    assert_eq!(order.load(Ordering::SeqCst), 2);
}

#[test]
fn try_finally_orders_compensation_after_the_body() {
    init_test_logging();
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let body_trace = Arc::clone(&trace);
    let comp_trace = Arc::clone(&trace);
    let computation = ops::try_finally(
        ops::delay(move || {
            body_trace.lock().expect("trace lock").push("body");
            ops::pure(1)
        }),
        move || comp_trace.lock().expect("trace lock").push("finally"),
    );
    let value = run_synchronously(&computation, None, Some(token())).expect("ok");
    assert_eq!(value, 1);
    assert_eq!(*trace.lock().expect("trace lock"), vec!["body", "finally"]);
}

#[test]
fn try_finally_compensation_fault_replaces_success() {
    init_test_logging();
    let computation = ops::try_finally(ops::pure(1), || panic!("compensation bug"));
    let err = run_synchronously(&computation, None, Some(token())).expect_err("faulted");
    assert!(err
        .fault()
        .expect("fault")
        .message()
        .contains("compensation bug"));
}

#[test]
fn try_with_does_not_intercept_success() {
    init_test_logging();
    let touched = Arc::new(AtomicU32::new(0));
    let observer = Arc::clone(&touched);
    let computation = ops::try_with(ops::pure(5), move |_fault| {
        observer.fetch_add(1, Ordering::SeqCst);
        ops::pure(0)
    });
    assert_eq!(run(&computation).expect("ok"), 5);
    assert_eq!(touched.load(Ordering::SeqCst), 0);
}

#[test]
fn handler_fault_flows_to_the_outer_continuation() {
    init_test_logging();
    let computation = ops::try_with(ops::raise::<i32>(Fault::new("inner")), |_fault| {
        panic!("handler bug")
    });
    let err = run_synchronously(&computation, None, Some(token())).expect_err("faulted");
    assert!(err.fault().expect("fault").message().contains("handler bug"));
}

#[test]
fn using_disposes_exactly_once_on_every_path() {
    init_test_logging();
    struct Resource(AtomicU32);
    impl continuo::Disposable for Resource {
        fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    // Success path.
    let resource = Arc::new(Resource(AtomicU32::new(0)));
    let handle = Arc::clone(&resource);
    let computation = ops::using(handle, |_r| ops::pure(1));
    run_synchronously(&computation, None, Some(token())).expect("ok");
    assert_eq!(resource.0.load(Ordering::SeqCst), 1);

    // Fault path.
    let resource = Arc::new(Resource(AtomicU32::new(0)));
    let handle = Arc::clone(&resource);
    let computation = ops::using(handle, |_r| ops::raise::<i32>(Fault::new("use failed")));
    let _ = run_synchronously(&computation, None, Some(token())).expect_err("faulted");
    assert_eq!(resource.0.load(Ordering::SeqCst), 1);
}

#[test]
fn map_composes() {
    init_test_logging();
    let doubled_then_shown = ops::map(ops::map(ops::pure(4), |x| x * 2), |x| format!("{x}"));
    assert_eq!(run(&doubled_then_shown).expect("ok"), "8");
}

#[test]
fn ignore_discards_the_value() {
    init_test_logging();
    let computation = ops::ignore(ops::pure("payload"));
    run_synchronously(&computation, None, Some(token())).expect("ok");
}

#[test]
fn fault_site_survives_combinator_wrapping() {
    init_test_logging();
    let fault = Fault::new("located here");
    let expected_line = fault.site().location().expect("site").line();
    let computation = ops::try_finally(
        ops::bind(ops::pure(1), move |_| ops::raise::<i32>(fault.clone())),
        || {},
    );
    let err = run_synchronously(&computation, None, Some(token())).expect_err("faulted");
    let observed = err
        .fault()
        .expect("fault")
        .site()
        .location()
        .expect("preserved site");
    assert_eq!(observed.line(), expected_line);
}
