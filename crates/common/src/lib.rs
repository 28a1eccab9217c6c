//! Common types for the money-movement service
//!
//! This crate defines:
//! - The instruction model replicated through each partition's log
//! - Transaction and proposal identifiers (UUIDv7-based)
//! - Decimal amounts
//! - Deterministic content ids for accounts and payments

mod amount;
mod error;
mod hash;
mod instruction;
mod transaction_id;

pub use amount::Amount;
pub use error::{CodecError, Result};
pub use hash::ContentId;
pub use instruction::{
    AccountInfo, Instruction, InstructionKind, InstructionPayload, PaymentInfo, Proposal,
    ProposalId,
};
pub use transaction_id::TransactionId;
