// Integration tests for error type display and conversions.

use magpie_api::errors::{ConfigError, LendError, SystemError};

#[test]
fn system_errors_render_their_context() {
    let err = SystemError::QueueFull { capacity: 64 };
    assert_eq!(err.to_string(), "Work queue is full (capacity: 64)");

    let err = SystemError::ThreadSetupError("no stack".to_string());
    assert!(err.to_string().contains("no stack"));
}

#[test]
fn internal_faults_wrap_into_system_errors() {
    let err: SystemError = anyhow::anyhow!("ledger wedged").into();
    assert!(matches!(err, SystemError::Other(_)));
    assert!(err.to_string().contains("ledger wedged"));
}

#[test]
fn lend_errors_name_the_pool() {
    assert_eq!(
        LendError::NotEligible(3).to_string(),
        "Pool 3 is not eligible to borrow shared threads"
    );
    assert_eq!(LendError::AlreadyBorrowing(1).to_string(), "Pool 1 already holds a shared thread");
    assert_eq!(LendError::NotBorrowing(2).to_string(), "Pool 2 holds no shared thread");
}

#[test]
fn config_errors_name_the_pool() {
    assert_eq!(
        ConfigError::DuplicatePoolId(4).to_string(),
        "Duplicate PoolId 4 in pool configuration"
    );
    assert_eq!(
        ConfigError::MissingPoolId(9).to_string(),
        "PoolId 9 has no basic or IO pool configuration"
    );
}
