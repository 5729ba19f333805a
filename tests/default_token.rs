//! Default cancellation token semantics.
//!
//! Kept in its own binary: cancelling the default token would race any
//! sibling test that runs with no explicit token.

use continuo::test_utils::init_test_logging;
use continuo::{cancel_default_token, default_token, ops, run_synchronously};

#[test]
fn cancel_default_token_replaces_before_cancelling() {
    init_test_logging();
    let before = default_token();
    assert!(!before.is_cancelled());

    cancel_default_token();

    // The captured token observed the cancel; the steady state is a
    // fresh, live default.
    assert!(before.is_cancelled());
    let after = default_token();
    assert!(!after.is_cancelled());
    assert!(!after.same_token(&before));

    // Running with no explicit token uses the fresh default.
    assert_eq!(run_synchronously(&ops::pure(3), None, None).expect("ok"), 3);
}
