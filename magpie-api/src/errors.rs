use thiserror::Error;

use crate::pool::PoolId;

/// Errors from executor pool operations.
///
/// Lifecycle calls (prepare, start, prepare-stop, shutdown, cleanup) do not
/// return errors; configuration inconsistencies there are process-fatal.
/// These variants cover the recoverable paths: submitting work and thread
/// setup.
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Thread setup error: {0}")]
    ThreadSetupError(String),
    #[error("Executor pool is not running")]
    NotRunning,
    #[error("Executor pool is shutting down")]
    ShuttingDown,
    #[error("Work queue is full (capacity: {capacity})")]
    QueueFull { capacity: usize },
    #[error("Internal system error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Errors from shared-thread lending operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LendError {
    #[error("Pool {0} is not eligible to borrow shared threads")]
    NotEligible(PoolId),
    #[error("No lendable thread is available")]
    Exhausted,
    #[error("Pool {0} already holds a shared thread")]
    AlreadyBorrowing(PoolId),
    #[error("Pool {0} holds no shared thread")]
    NotBorrowing(PoolId),
    #[error("Shared pool is shutting down")]
    ShuttingDown,
}

/// Errors from CPU manager configuration validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Duplicate PoolId {0} in pool configuration")]
    DuplicatePoolId(PoolId),
    #[error("PoolId {0} has no basic or IO pool configuration")]
    MissingPoolId(PoolId),
}
