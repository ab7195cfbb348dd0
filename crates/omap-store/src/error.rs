//! Object store error types

use thiserror::Error;

/// Result type alias for object store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors reported by an object store backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Object, omap key or lock does not exist
    #[error("No such object or key")]
    NotFound,

    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    /// Exclusive lock is held by someone else and the wait expired
    #[error("Lock {name} busy (held by {holder})")]
    Busy { name: String, holder: String },

    #[error("Lock owner mismatch: expected {expected}, got {actual}")]
    LockOwnerMismatch { expected: String, actual: String },

    /// Operation could not even be queued
    #[error("Operation rejected: {0}")]
    Rejected(String),

    /// Completion was dropped before the backend produced a result
    #[error("Operation canceled")]
    Canceled,

    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Negative errno equivalent, used in log lines
    pub fn errno(&self) -> i32 {
        match self {
            StoreError::NotFound | StoreError::PoolNotFound(_) => -2,
            StoreError::Busy { .. } => -16,
            StoreError::LockOwnerMismatch { .. } => -1,
            StoreError::Rejected(_) => -22,
            StoreError::Canceled => -125,
            StoreError::Io(_) => -5,
        }
    }
}
