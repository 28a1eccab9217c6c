//! Account and payment state of one partition
//!
//! The store is a plain value: the applier owns the only mutable reference
//! and every replica that applies the same entries in the same order ends
//! up with an equal store.

use crate::{ResourceError, Result};
use mas_common::{AccountInfo, Amount, Instruction, InstructionPayload, PaymentInfo, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which side of a payment a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentDirection {
    Sent,
    Received,
}

/// A payment leg applied to this partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub xid: TransactionId,
    pub direction: PaymentDirection,
    pub payment: PaymentInfo,
}

/// Accounts, applied payment legs and the log position they reflect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStore {
    accounts: BTreeMap<String, AccountInfo>,
    payments: Vec<PaymentRecord>,
    /// Index of the last log entry reflected in this state
    applied_index: u64,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self, number: &str) -> Option<&AccountInfo> {
        self.accounts.get(number)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountInfo> {
        self.accounts.values()
    }

    pub fn balance(&self, number: &str) -> Option<Amount> {
        self.accounts.get(number).map(|a| a.balance)
    }

    /// Payment legs touching `number`, in apply order
    pub fn payments_for<'a>(&'a self, number: &'a str) -> impl Iterator<Item = &'a PaymentRecord> {
        self.payments.iter().filter(move |r| match r.direction {
            PaymentDirection::Sent => r.payment.from == number,
            PaymentDirection::Received => r.payment.to == number,
        })
    }

    pub fn payment_count(&self) -> usize {
        self.payments.len()
    }

    pub fn applied_index(&self) -> u64 {
        self.applied_index
    }

    pub(crate) fn set_applied_index(&mut self, index: u64) {
        self.applied_index = index;
    }

    /// Apply one instruction. A rejected instruction leaves the store as it
    /// was.
    pub fn apply(&mut self, instruction: &Instruction) -> Result<()> {
        match &instruction.payload {
            InstructionPayload::CreateAccount(account) => self.create_account(account),
            InstructionPayload::SendPayment(payment) => self.debit(instruction.xid, payment),
            InstructionPayload::ReceivePayment(payment) => self.credit(instruction.xid, payment),
            InstructionPayload::QueryAccount(account) => self
                .accounts
                .get(&account.number)
                .map(|_| ())
                .ok_or_else(|| ResourceError::UnknownAccount(account.number.clone())),
        }
    }

    fn create_account(&mut self, account: &AccountInfo) -> Result<()> {
        if self.accounts.contains_key(&account.number) {
            return Err(ResourceError::AccountExists(account.number.clone()));
        }
        if account.balance.is_negative() {
            return Err(ResourceError::InvalidAmount(account.balance));
        }
        self.accounts.insert(account.number.clone(), account.clone());
        Ok(())
    }

    fn debit(&mut self, xid: TransactionId, payment: &PaymentInfo) -> Result<()> {
        if !payment.amount.is_positive() {
            return Err(ResourceError::InvalidAmount(payment.amount));
        }
        let account = self
            .accounts
            .get_mut(&payment.from)
            .ok_or_else(|| ResourceError::UnknownAccount(payment.from.clone()))?;
        if account.balance < payment.amount {
            return Err(ResourceError::InsufficientFunds {
                account: payment.from.clone(),
                available: account.balance,
                requested: payment.amount,
            });
        }

        account.balance = account.balance - payment.amount;
        self.payments.push(PaymentRecord {
            xid,
            direction: PaymentDirection::Sent,
            payment: payment.clone(),
        });
        Ok(())
    }

    fn credit(&mut self, xid: TransactionId, payment: &PaymentInfo) -> Result<()> {
        if !payment.amount.is_positive() {
            return Err(ResourceError::InvalidAmount(payment.amount));
        }
        let account = self
            .accounts
            .get_mut(&payment.to)
            .ok_or_else(|| ResourceError::UnknownAccount(payment.to.clone()))?;

        account.balance = account.balance + payment.amount;
        self.payments.push(PaymentRecord {
            xid,
            direction: PaymentDirection::Received,
            payment: payment.clone(),
        });
        Ok(())
    }

    /// Serialize to a compressed snapshot payload
    pub fn to_snapshot(&self) -> std::result::Result<Vec<u8>, String> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| format!("Failed to serialize snapshot: {}", e))?;

        zstd::encode_all(&buf[..], 3).map_err(|e| format!("Failed to compress snapshot: {}", e))
    }

    /// Rebuild a store from a snapshot payload
    pub fn from_snapshot(data: &[u8]) -> std::result::Result<Self, String> {
        let decompressed =
            zstd::decode_all(data).map_err(|e| format!("Failed to decompress snapshot: {}", e))?;

        ciborium::from_reader(&decompressed[..])
            .map_err(|e| format!("Failed to deserialize snapshot: {}", e))
    }
}
