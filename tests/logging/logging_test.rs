//! Tests for `src/logging.rs`.

use pbchat::logging::{LoggingGuard, LOG_FILE_PREFIX};

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

    // Only one global subscriber per process; the directory is created
    // before installation is attempted.
    let _result = pbchat::logging::init_production(&logs_dir);
    assert!(logs_dir.exists(), "logs directory should be created");
}

#[test]
fn init_cli_tolerates_existing_subscriber() {
    pbchat::logging::init_cli();
    pbchat::logging::init_cli();
    assert_eq!(LOG_FILE_PREFIX, "pbchat.log");
}
