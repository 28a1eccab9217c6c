//! Error types for the lock service

use thiserror::Error;

/// Result type for lock operations
pub type Result<T> = std::result::Result<T, LockError>;

/// Lock service errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock key must not be empty")]
    EmptyKey,

    #[error("Lock service unavailable: {0}")]
    Unavailable(String),
}
