//! Tests for `src/logging.rs`.

use leadflow::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // Only call site in this binary; the global subscriber can be set once.
    let _guard = leadflow::logging::init_production(Some(logs_dir.as_path()), "info")
        .expect("logging should initialise");
    assert!(logs_dir.exists(), "logs directory should be created");
}
