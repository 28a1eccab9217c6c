//! Request and response bodies of the resource-manager RPC surface

use mas_common::{AccountInfo, Instruction, TransactionId};
use serde::{Deserialize, Serialize};

/// Request to a resource-manager peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RmRequest {
    /// Validate and reserve, without applying
    Prepare {
        local_txn_id: TransactionId,
        instruction: Instruction,
    },
    /// Replicate and apply
    Commit {
        local_txn_id: TransactionId,
        instruction: Instruction,
    },
    /// Drop the reservation made by prepare
    Rollback {
        local_txn_id: TransactionId,
        instruction: Instruction,
    },
    /// Read an account
    Query { instruction: Instruction },
}

impl RmRequest {
    pub fn name(&self) -> &'static str {
        match self {
            RmRequest::Prepare { .. } => "prepare",
            RmRequest::Commit { .. } => "commit",
            RmRequest::Rollback { .. } => "rollback",
            RmRequest::Query { .. } => "query",
        }
    }
}

/// Response from a resource-manager peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum RmResponse {
    Ok,
    /// The request was understood and refused
    Fail(String),
    Account(AccountInfo),
    /// The replica did not act on the request
    Unavailable(String),
    /// The request was acted on but its outcome is unknown
    Unknown(String),
}
