//! Instruction model
//!
//! An [`Instruction`] is the unit of intent replicated through a partition's
//! log. The payload is a tagged union, so the serialized form carries its
//! own type tag and can be decoded without any outside schema. Unknown tags
//! fail to decode.

use crate::error::{CodecError, Result};
use crate::{Amount, ContentId, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account state owned by one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub id: ContentId,
    /// External key, unique across the whole system
    pub number: String,
    pub balance: Amount,
}

impl AccountInfo {
    pub fn new(number: impl Into<String>, balance: Amount) -> Self {
        let number = number.into();
        Self {
            id: ContentId::of(&[&number]),
            number,
            balance,
        }
    }
}

/// Immutable payment record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    /// Derived from (from, to, created_at)
    pub id: ContentId,
    pub from: String,
    pub to: String,
    pub amount: Amount,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
}

impl PaymentInfo {
    /// Create a payment stamped with the current time
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: Amount) -> Self {
        Self::at(from, to, amount, chrono::Utc::now().timestamp_millis())
    }

    /// Create a payment with an explicit timestamp
    pub fn at(
        from: impl Into<String>,
        to: impl Into<String>,
        amount: Amount,
        created_at: i64,
    ) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: ContentId::of(&[&from, &to, &created_at.to_string()]),
            from,
            to,
            amount,
            created_at,
        }
    }
}

/// Instruction type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionKind {
    CreateAccount,
    SendPayment,
    ReceivePayment,
    QueryAccount,
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstructionKind::CreateAccount => "create_account",
            InstructionKind::SendPayment => "send_payment",
            InstructionKind::ReceivePayment => "receive_payment",
            InstructionKind::QueryAccount => "query_account",
        };
        f.write_str(name)
    }
}

/// Instruction payload keyed by type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum InstructionPayload {
    CreateAccount(AccountInfo),
    SendPayment(PaymentInfo),
    ReceivePayment(PaymentInfo),
    QueryAccount(AccountInfo),
}

/// Unit of replicated intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Global transaction this instruction belongs to
    pub xid: TransactionId,
    pub payload: InstructionPayload,
}

impl Instruction {
    pub fn create_account(xid: TransactionId, account: AccountInfo) -> Self {
        Self {
            xid,
            payload: InstructionPayload::CreateAccount(account),
        }
    }

    /// Debit leg of a payment
    pub fn send_payment(xid: TransactionId, payment: PaymentInfo) -> Self {
        Self {
            xid,
            payload: InstructionPayload::SendPayment(payment),
        }
    }

    /// Credit leg of a payment
    pub fn receive_payment(xid: TransactionId, payment: PaymentInfo) -> Self {
        Self {
            xid,
            payload: InstructionPayload::ReceivePayment(payment),
        }
    }

    pub fn query_account(number: impl Into<String>) -> Self {
        Self {
            xid: TransactionId::new(),
            payload: InstructionPayload::QueryAccount(AccountInfo::new(number, Amount::zero())),
        }
    }

    pub fn kind(&self) -> InstructionKind {
        match self.payload {
            InstructionPayload::CreateAccount(_) => InstructionKind::CreateAccount,
            InstructionPayload::SendPayment(_) => InstructionKind::SendPayment,
            InstructionPayload::ReceivePayment(_) => InstructionKind::ReceivePayment,
            InstructionPayload::QueryAccount(_) => InstructionKind::QueryAccount,
        }
    }

    /// Account whose partition executes this instruction, and whose lock
    /// guards it
    pub fn subject_account(&self) -> &str {
        match &self.payload {
            InstructionPayload::CreateAccount(account)
            | InstructionPayload::QueryAccount(account) => &account.number,
            InstructionPayload::SendPayment(payment) => &payment.from,
            InstructionPayload::ReceivePayment(payment) => &payment.to,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.kind(), self.subject_account(), self.xid)
    }
}

/// Correlates a proposal with its entry on the commit stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(Uuid);

impl ProposalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope placed on the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub instruction: Instruction,
}

impl Proposal {
    pub fn new(instruction: Instruction) -> Self {
        Self {
            id: ProposalId::new(),
            instruction,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
