//! Error types for the resource-manager partition

use mas_common::Amount;
use thiserror::Error;

/// Result type for account-level operations
pub type Result<T> = std::result::Result<T, ResourceError>;

/// Business-rule failures. These are expected outcomes, reported to the
/// caller as a rejection rather than treated as faults.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("account {0} does not exist")]
    UnknownAccount(String),

    #[error("account {0} already exists")]
    AccountExists(String),

    #[error("insufficient funds in {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: String,
        available: Amount,
        requested: Amount,
    },

    #[error("invalid amount {0}")]
    InvalidAmount(Amount),

    #[error("account {0} is being created by another transaction")]
    CreateInProgress(String),
}

/// Faults of the apply loop and its proposal path
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplierError {
    #[error("Failed to decode log entry {index}: {reason}")]
    Decode { index: u64, reason: String },

    #[error("Failed to encode proposal: {0}")]
    Encode(String),

    #[error("Failed to load snapshot: {0}")]
    SnapshotLoad(String),

    #[error("Failed to build snapshot: {0}")]
    SnapshotEncode(String),

    #[error("Failed to save snapshot: {0}")]
    SnapshotSave(String),

    #[error("Replication failed: {0}")]
    Replication(String),

    #[error("Proposal channel closed")]
    ProposalsClosed,

    #[error("Timed out waiting for proposal to apply")]
    Timeout,

    #[error("Applier stopped before the proposal was applied")]
    Stopped,
}
