//! Metadata record types

use chrono::{DateTime, Utc};
use mas_common::TransactionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A resource-manager peer and the partition it replicates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Request subject the peer serves on
    pub address: String,
    /// Replication group the peer belongs to
    pub partition: String,
}

impl PeerInfo {
    pub fn new(address: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            partition: partition.into(),
        }
    }
}

/// Final state of a global transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnState {
    Committed,
    Aborted,
    /// Some sub-transactions committed and some did not; needs reconciliation
    PartiallyCommitted,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnState::Committed => write!(f, "COMMITTED"),
            TxnState::Aborted => write!(f, "ABORTED"),
            TxnState::PartiallyCommitted => write!(f, "PARTIALLY_COMMITTED"),
        }
    }
}

/// Audit record written once a global transaction resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub global_txn_id: TransactionId,
    pub timestamp: DateTime<Utc>,
    pub state: TxnState,
    /// Account numbers in the order the transaction touched them
    pub accounts_involved: Vec<String>,
    /// Local transactions whose commit failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_local_txns: Vec<TransactionId>,
}

impl TransactionLogEntry {
    pub fn new(global_txn_id: TransactionId, state: TxnState, accounts: Vec<String>) -> Self {
        Self {
            global_txn_id,
            timestamp: Utc::now(),
            state,
            accounts_involved: accounts,
            failed_local_txns: Vec::new(),
        }
    }

    pub fn with_failed(mut self, failed: Vec<TransactionId>) -> Self {
        self.failed_local_txns = failed;
        self
    }

    /// Accounts as a comma-separated list
    pub fn accounts_csv(&self) -> String {
        self.accounts_involved.join(",")
    }
}
