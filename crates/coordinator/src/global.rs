//! Cross-partition transaction

use crate::transaction::{Transaction, TransactionState};
use async_trait::async_trait;
use mas_common::TransactionId;

/// Sub-transactions sharing one global id
///
/// Prepare visits sub-transactions in lock-key order so concurrent global
/// transactions over overlapping accounts acquire their locks in the same
/// order. Commit visits them in the order supplied, stopping at the first
/// failure.
pub struct GlobalTransaction {
    id: TransactionId,
    subs: Vec<Box<dyn Transaction>>,
    state: TransactionState,
    /// Local ids whose commit failed or never ran after a failure
    failed: Vec<TransactionId>,
}

impl GlobalTransaction {
    pub fn new(id: TransactionId, subs: Vec<Box<dyn Transaction>>) -> Self {
        Self {
            id,
            subs,
            state: TransactionState::Init,
            failed: Vec::new(),
        }
    }

    /// Gate between the phases: only a prepared transaction may commit
    pub fn begin(&mut self) -> bool {
        if self.state != TransactionState::Prepared {
            tracing::warn!(global_txn_id = %self.id, state = %self.state, "Begin without prepare");
            return false;
        }
        self.state = TransactionState::Committing;
        true
    }

    /// Sub-transactions that did not commit
    pub fn failed_local_txns(&self) -> &[TransactionId] {
        &self.failed
    }

    fn prepare_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.subs.len()).collect();
        order.sort_by(|&a, &b| self.subs[a].lock_key().cmp(self.subs[b].lock_key()));
        order
    }
}

#[async_trait]
impl Transaction for GlobalTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn lock_key(&self) -> &str {
        self.subs.first().map(|s| s.lock_key()).unwrap_or("")
    }

    fn state(&self) -> TransactionState {
        self.state
    }

    async fn prepare(&mut self) -> bool {
        if self.state != TransactionState::Init {
            return false;
        }
        self.state = TransactionState::Preparing;

        let order = self.prepare_order();
        for (position, &index) in order.iter().enumerate() {
            if self.subs[index].prepare().await {
                continue;
            }

            tracing::info!(
                global_txn_id = %self.id,
                local_txn_id = %self.subs[index].id(),
                "Sub-transaction failed to prepare, releasing the others"
            );
            for &prepared in &order[..position] {
                self.subs[prepared].rollback().await;
            }
            self.state = TransactionState::PrepareFailed;
            return false;
        }

        self.state = TransactionState::Prepared;
        true
    }

    async fn commit(&mut self) -> bool {
        if self.state != TransactionState::Committing {
            tracing::warn!(global_txn_id = %self.id, state = %self.state, "Commit without begin");
            return false;
        }

        let mut committed = 0;
        let mut failure = None;
        for (index, sub) in self.subs.iter_mut().enumerate() {
            if sub.commit().await {
                committed += 1;
            } else {
                failure = Some(index);
                break;
            }
        }

        let Some(failed_at) = failure else {
            self.state = TransactionState::Committed;
            return true;
        };

        // Everything from the failure on is not known to be committed. The
        // untouched ones never reached their partition, so release them
        let unknown = self.subs[failed_at].state() == TransactionState::CommitUnknown;
        for sub in &mut self.subs[failed_at..] {
            self.failed.push(sub.id());
            if sub.state() == TransactionState::Prepared {
                sub.rollback().await;
            }
        }

        self.state = if committed == 0 && !unknown {
            TransactionState::Aborted
        } else {
            TransactionState::PartiallyCommitted
        };
        if unknown {
            tracing::error!(
                target: "mas::anomaly",
                global_txn_id = %self.id,
                local_txn_id = %self.subs[failed_at].id(),
                "Sub-transaction commit outcome unknown"
            );
        }
        false
    }

    async fn rollback(&mut self) -> bool {
        if self.state.is_final() && self.state != TransactionState::Aborted {
            return false;
        }

        let mut all = true;
        for sub in &mut self.subs {
            all &= sub.rollback().await;
        }
        self.state = TransactionState::Aborted;
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTxn;

    #[tokio::test]
    async fn test_all_commit() {
        let (a, a_log) = FakeTxn::new("A1");
        let (b, b_log) = FakeTxn::new("A2");
        let mut txn = GlobalTransaction::new(TransactionId::new(), vec![Box::new(a), Box::new(b)]);

        assert!(txn.prepare().await);
        assert!(txn.begin());
        assert!(txn.commit().await);
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(a_log.events(), vec!["prepare", "commit"]);
        assert_eq!(b_log.events(), vec!["prepare", "commit"]);
    }

    #[tokio::test]
    async fn test_commit_requires_begin() {
        let (a, _) = FakeTxn::new("A1");
        let mut txn = GlobalTransaction::new(TransactionId::new(), vec![Box::new(a)]);

        assert!(!txn.begin());
        assert!(!txn.commit().await);
        assert!(txn.prepare().await);
        assert!(!txn.commit().await);
    }

    #[tokio::test]
    async fn test_prepare_failure_releases_earlier_subs() {
        let (a, a_log) = FakeTxn::new("A1");
        let (b, b_log) = FakeTxn::new("A2");
        let (c, c_log) = FakeTxn::new("A3");
        let mut txn = GlobalTransaction::new(
            TransactionId::new(),
            vec![Box::new(a), Box::new(b.fail_prepare()), Box::new(c)],
        );

        assert!(!txn.prepare().await);
        assert_eq!(txn.state(), TransactionState::PrepareFailed);
        assert_eq!(a_log.events(), vec!["prepare", "rollback"]);
        assert_eq!(b_log.events(), vec!["prepare"]);
        // Short-circuit: never reached
        assert!(c_log.events().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_visits_lock_keys_in_order() {
        let (z, z_log) = FakeTxn::new("Z9");
        let (a, a_log) = FakeTxn::new("A1");
        let mut txn = GlobalTransaction::new(
            TransactionId::new(),
            vec![Box::new(z), Box::new(a.fail_prepare())],
        );

        // A1 sorts first and fails, so Z9 is never locked
        assert!(!txn.prepare().await);
        assert_eq!(a_log.events(), vec!["prepare"]);
        assert!(z_log.events().is_empty());
    }

    #[tokio::test]
    async fn test_first_commit_failure_is_a_clean_abort() {
        let (a, _) = FakeTxn::new("A1");
        let (b, b_log) = FakeTxn::new("A2");
        let a = a.fail_commit();
        let a_id = a.id();
        let b_id = b.id();
        let mut txn = GlobalTransaction::new(TransactionId::new(), vec![Box::new(a), Box::new(b)]);

        assert!(txn.prepare().await);
        assert!(txn.begin());
        assert!(!txn.commit().await);
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(txn.failed_local_txns(), &[a_id, b_id]);
        assert_eq!(b_log.events(), vec!["prepare", "rollback"]);
    }

    #[tokio::test]
    async fn test_later_commit_failure_is_partial() {
        let (a, _) = FakeTxn::new("A1");
        let (b, _) = FakeTxn::new("A2");
        let b = b.fail_commit();
        let b_id = b.id();
        let mut txn = GlobalTransaction::new(TransactionId::new(), vec![Box::new(a), Box::new(b)]);

        assert!(txn.prepare().await);
        assert!(txn.begin());
        assert!(!txn.commit().await);
        assert_eq!(txn.state(), TransactionState::PartiallyCommitted);
        assert_eq!(txn.failed_local_txns(), &[b_id]);
        // A partially committed transaction cannot be rolled back
        assert!(!txn.rollback().await);
    }

    #[tokio::test]
    async fn test_unknown_first_commit_is_never_an_abort() {
        let (a, a_log) = FakeTxn::new("A1");
        let (b, b_log) = FakeTxn::new("A2");
        let a = a.unknown_commit();
        let a_id = a.id();
        let b_id = b.id();
        let mut txn = GlobalTransaction::new(TransactionId::new(), vec![Box::new(a), Box::new(b)]);

        assert!(txn.prepare().await);
        assert!(txn.begin());
        assert!(!txn.commit().await);
        // The debit may have applied, so this is not a clean abort
        assert_eq!(txn.state(), TransactionState::PartiallyCommitted);
        assert_eq!(txn.failed_local_txns(), &[a_id, b_id]);
        assert_eq!(a_log.events(), vec!["prepare", "commit"]);
        assert_eq!(b_log.events(), vec!["prepare", "rollback"]);
        assert!(!txn.rollback().await);
        assert_eq!(a_log.events(), vec!["prepare", "commit"]);
    }
}
