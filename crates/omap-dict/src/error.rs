//! Dictionary error types

use omap_store::StoreError;
use thiserror::Error;

/// Result type alias for dictionary operations
pub type Result<T> = std::result::Result<T, DictError>;

/// Errors raised by dictionary setup and by invalid caller input
#[derive(Error, Debug, Clone)]
pub enum DictError {
    /// Key outside the private and shared namespaces
    #[error("Invalid key (no private/ or shared/ prefix): {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Error creating dictionary: {0}")]
    Create(String),

    /// Requested feature is not supported by this backend
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
