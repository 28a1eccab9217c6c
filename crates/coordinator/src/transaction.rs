//! Two-phase commit participants
//!
//! Both [`LocalTransaction`](crate::LocalTransaction) and
//! [`GlobalTransaction`](crate::GlobalTransaction) move through the same
//! states. Failures never surface as errors here: every step answers with a
//! boolean and logs why.

use async_trait::async_trait;
use mas_common::TransactionId;
use std::fmt;

/// Transaction state in the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Init,
    Preparing,
    Prepared,
    PrepareFailed,
    Committing,
    Committed,
    /// Some sub-transactions committed, others did not, or an outcome is
    /// unknown
    PartiallyCommitted,
    /// Commit was sent but its outcome never came back; it may have applied
    CommitUnknown,
    Aborted,
}

impl TransactionState {
    /// No further transitions are possible
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed
                | TransactionState::PartiallyCommitted
                | TransactionState::CommitUnknown
                | TransactionState::Aborted
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One participant of the two-phase commit
#[async_trait]
pub trait Transaction: Send {
    /// Identifier of this transaction
    fn id(&self) -> TransactionId;

    /// Key locked while the transaction is prepared
    fn lock_key(&self) -> &str;

    fn state(&self) -> TransactionState;

    /// Phase one: lock and validate
    async fn prepare(&mut self) -> bool;

    /// Phase two: apply and release
    async fn commit(&mut self) -> bool;

    /// Undo whatever prepare holds
    async fn rollback(&mut self) -> bool;
}
