//! Error types for the coordinator

use mas_lock::LockError;
use mas_meta::MetaError;
use thiserror::Error;

/// Coordinator error types
///
/// Protocol outcomes (refusals, aborts) are replies, not errors. These are
/// failures of the coordinator's own collaborators or configuration.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Metadata store error: {0}")]
    Meta(#[from] MetaError),

    #[error("Lock service error: {0}")]
    Lock(#[from] LockError),

    #[error("No partition has {needed} peers available")]
    InsufficientPeers { needed: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
