//! Shared helpers for unit and integration tests.
//!
//! - Consistent logging initialization (`tracing-subscriber` when the
//!   `tracing-integration` feature is on, a no-op otherwise)
//! - Phase/section macros for readable test output
//! - Outcome assertion macros

/// Initialize test logging. Safe to call multiple times; only the first
/// call takes effect.
#[cfg(feature = "tracing-integration")]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Initialize test logging (no-op without the `tracing-integration`
/// feature).
#[cfg(not(feature = "tracing-integration"))]
pub fn init_test_logging() {}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::tracing_compat::info!("========================================");
        $crate::tracing_compat::info!("TEST PHASE: {}", $name);
        $crate::tracing_compat::info!("========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        $crate::tracing_compat::debug!("--- {} ---", $name);
    };
}

/// Log test completion.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::tracing_compat::info!("test completed successfully: {}", $name);
    };
}

/// Log expected/actual context before asserting.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        $crate::tracing_compat::debug!(
            "Asserting: {} (expected {:?}, actual {:?})",
            $msg,
            $expected,
            $actual
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that an outcome is `Ok` with a specific value.
#[macro_export]
macro_rules! assert_outcome_ok {
    ($outcome:expr, $expected:expr) => {
        match $outcome {
            $crate::outcome::AsyncOutcome::Ok(v) => assert_eq!(v, $expected),
            other => unreachable!("expected AsyncOutcome::Ok({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an outcome is `Faulted`.
#[macro_export]
macro_rules! assert_outcome_faulted {
    ($outcome:expr) => {
        match $outcome {
            $crate::outcome::AsyncOutcome::Faulted(_) => {}
            other => unreachable!("expected AsyncOutcome::Faulted, got {:?}", other),
        }
    };
}

/// Assert that an outcome is `Cancelled`.
#[macro_export]
macro_rules! assert_outcome_cancelled {
    ($outcome:expr) => {
        match $outcome {
            $crate::outcome::AsyncOutcome::Cancelled(_) => {}
            other => unreachable!("expected AsyncOutcome::Cancelled, got {:?}", other),
        }
    };
}
