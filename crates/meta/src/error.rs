//! Error types for the metadata store

use mas_common::TransactionId;
use thiserror::Error;

/// Result type for metadata operations
pub type Result<T> = std::result::Result<T, MetaError>;

/// Metadata store errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetaError {
    #[error("Bucket for account {0} has no peers")]
    EmptyBucket(String),

    #[error("Transaction {0} already has a log entry")]
    DuplicateEntry(TransactionId),

    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),
}
