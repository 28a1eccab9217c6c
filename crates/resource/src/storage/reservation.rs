//! Prepare-time reservations
//!
//! A prepared local transaction holds a reservation until it commits or
//! rolls back. Debit reservations lower the balance other transactions can
//! spend; create reservations claim an account number.

use crate::{ResourceError, Result};
use mas_common::{Amount, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Type of reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationType {
    /// Reserve balance for spending
    Debit(Amount),
    /// Announce an incoming credit
    Credit(Amount),
    /// Claim an account number for creation
    Create,
}

/// A reservation held by one local transaction on one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub transaction_id: TransactionId,
    pub account: String,
    pub reservation_type: ReservationType,
}

/// Tracks outstanding reservations per account and per transaction
#[derive(Debug, Default)]
pub struct ReservationManager {
    /// Map<account, Vec<Reservation>>
    account_reservations: HashMap<String, Vec<Reservation>>,

    /// Accounts each transaction has reservations on
    transaction_accounts: HashMap<TransactionId, HashSet<String>>,
}

impl ReservationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total amount reserved for debits on an account
    pub fn reserved_debits(&self, account: &str) -> Amount {
        self.account_reservations
            .get(account)
            .map(|reservations| {
                reservations
                    .iter()
                    .filter_map(|r| match &r.reservation_type {
                        ReservationType::Debit(amt) => Some(*amt),
                        _ => None,
                    })
                    .fold(Amount::zero(), |acc, amt| acc + amt)
            })
            .unwrap_or_else(Amount::zero)
    }

    /// Balance left after outstanding debit reservations
    pub fn available(&self, account: &str, current_balance: Amount) -> Amount {
        current_balance - self.reserved_debits(account)
    }

    fn insert(&mut self, transaction_id: TransactionId, account: &str, kind: ReservationType) {
        self.account_reservations
            .entry(account.to_string())
            .or_default()
            .push(Reservation {
                transaction_id,
                account: account.to_string(),
                reservation_type: kind,
            });

        self.transaction_accounts
            .entry(transaction_id)
            .or_default()
            .insert(account.to_string());
    }

    /// Reserve balance for a debit
    pub fn reserve_debit(
        &mut self,
        transaction_id: TransactionId,
        account: &str,
        amount: Amount,
        current_balance: Amount,
    ) -> Result<()> {
        let available = self.available(account, current_balance);
        if available < amount {
            return Err(ResourceError::InsufficientFunds {
                account: account.to_string(),
                available,
                requested: amount,
            });
        }

        self.insert(transaction_id, account, ReservationType::Debit(amount));
        Ok(())
    }

    /// Record an incoming credit
    pub fn reserve_credit(&mut self, transaction_id: TransactionId, account: &str, amount: Amount) {
        self.insert(transaction_id, account, ReservationType::Credit(amount));
    }

    /// Claim `account` for creation; only one transaction may hold the claim
    pub fn reserve_create(&mut self, transaction_id: TransactionId, account: &str) -> Result<()> {
        let claimed = self.account_reservations.get(account).is_some_and(|rs| {
            rs.iter().any(|r| {
                r.reservation_type == ReservationType::Create && r.transaction_id != transaction_id
            })
        });
        if claimed {
            return Err(ResourceError::CreateInProgress(account.to_string()));
        }

        self.insert(transaction_id, account, ReservationType::Create);
        Ok(())
    }

    /// Release all reservations for a transaction
    pub fn release_transaction(&mut self, transaction_id: TransactionId) -> bool {
        let Some(accounts) = self.transaction_accounts.remove(&transaction_id) else {
            return false;
        };

        for account in accounts {
            if let Some(reservations) = self.account_reservations.get_mut(&account) {
                reservations.retain(|r| r.transaction_id != transaction_id);
                if reservations.is_empty() {
                    self.account_reservations.remove(&account);
                }
            }
        }
        true
    }

    /// All reservations held by a transaction
    pub fn reservations_held_by(&self, transaction_id: TransactionId) -> Vec<Reservation> {
        let mut result = Vec::new();

        if let Some(accounts) = self.transaction_accounts.get(&transaction_id) {
            for account in accounts {
                if let Some(reservations) = self.account_reservations.get(account) {
                    result.extend(
                        reservations
                            .iter()
                            .filter(|r| r.transaction_id == transaction_id)
                            .cloned(),
                    );
                }
            }
        }

        result
    }

    pub fn is_empty(&self) -> bool {
        self.transaction_accounts.is_empty()
    }
}
