//! Sub-transaction against a single partition

use crate::transaction::{Transaction, TransactionState};
use async_trait::async_trait;
use mas_common::{Instruction, TransactionId};
use mas_lock::{LockClient, LockGuard};
use mas_resource_client::{ClientError, ResourceManagerClient};
use std::sync::Arc;
use std::time::Duration;

/// Deadlines applied to each resource-manager call
#[derive(Debug, Clone, Copy)]
pub struct LocalTimeouts {
    pub prepare: Duration,
    pub commit: Duration,
}

/// One instruction against one partition, guarded by the lock on its
/// subject account
pub struct LocalTransaction {
    local_id: TransactionId,
    global_id: TransactionId,
    instruction: Instruction,
    lock_key: String,

    rm: Arc<dyn ResourceManagerClient>,
    locks: Arc<dyn LockClient>,
    timeouts: LocalTimeouts,

    state: TransactionState,
    /// Held from a successful prepare until commit or rollback
    guard: Option<LockGuard>,
}

impl LocalTransaction {
    pub fn new(
        rm: Arc<dyn ResourceManagerClient>,
        locks: Arc<dyn LockClient>,
        instruction: Instruction,
        global_id: TransactionId,
        timeouts: LocalTimeouts,
    ) -> Self {
        let lock_key = instruction.subject_account().to_string();
        Self {
            local_id: TransactionId::new(),
            global_id,
            instruction,
            lock_key,
            rm,
            locks,
            timeouts,
            state: TransactionState::Init,
            guard: None,
        }
    }

    pub fn global_id(&self) -> TransactionId {
        self.global_id
    }

    async fn release_lock(&mut self) {
        if let Some(guard) = self.guard.take()
            && !guard.release().await
        {
            tracing::warn!(
                global_txn_id = %self.global_id,
                local_txn_id = %self.local_id,
                account = %self.lock_key,
                "Lock was not held at release"
            );
        }
    }

    /// Best-effort rollback on the partition; `true` when it confirmed
    async fn rollback_remote(&self) -> bool {
        match tokio::time::timeout(
            self.timeouts.prepare,
            self.rm.rollback(self.local_id, &self.instruction),
        )
        .await
        {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                tracing::warn!(local_txn_id = %self.local_id, error = %e, "Rollback failed");
                false
            }
            Err(_) => {
                tracing::warn!(local_txn_id = %self.local_id, "Rollback timed out");
                false
            }
        }
    }
}

#[async_trait]
impl Transaction for LocalTransaction {
    fn id(&self) -> TransactionId {
        self.local_id
    }

    fn lock_key(&self) -> &str {
        &self.lock_key
    }

    fn state(&self) -> TransactionState {
        self.state
    }

    async fn prepare(&mut self) -> bool {
        if self.state != TransactionState::Init {
            tracing::warn!(local_txn_id = %self.local_id, state = %self.state, "Prepare in wrong state");
            return false;
        }
        self.state = TransactionState::Preparing;

        let guard = match LockGuard::acquire(
            self.locks.clone(),
            self.lock_key.clone(),
            self.global_id,
        )
        .await
        {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::info!(
                    global_txn_id = %self.global_id,
                    account = %self.lock_key,
                    "Lock unavailable"
                );
                self.state = TransactionState::PrepareFailed;
                return false;
            }
            Err(e) => {
                tracing::warn!(global_txn_id = %self.global_id, account = %self.lock_key, error = %e, "Lock service error");
                self.state = TransactionState::PrepareFailed;
                return false;
            }
        };
        self.guard = Some(guard);

        let vote = tokio::time::timeout(
            self.timeouts.prepare,
            self.rm.prepare(self.local_id, &self.instruction),
        )
        .await;

        match vote {
            Ok(Ok(true)) => {
                tracing::debug!(
                    global_txn_id = %self.global_id,
                    local_txn_id = %self.local_id,
                    instruction = %self.instruction,
                    "Prepared"
                );
                self.state = TransactionState::Prepared;
                return true;
            }
            Ok(Ok(false)) => {
                tracing::info!(
                    global_txn_id = %self.global_id,
                    local_txn_id = %self.local_id,
                    instruction = %self.instruction,
                    "Prepare refused"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(local_txn_id = %self.local_id, error = %e, "Prepare failed");
                // The partition may have reserved before the failure
                self.rollback_remote().await;
            }
            Err(_) => {
                tracing::warn!(local_txn_id = %self.local_id, "Prepare timed out");
                self.rollback_remote().await;
            }
        }

        self.release_lock().await;
        self.state = TransactionState::PrepareFailed;
        false
    }

    async fn commit(&mut self) -> bool {
        if self.state != TransactionState::Prepared {
            tracing::warn!(local_txn_id = %self.local_id, state = %self.state, "Commit in wrong state");
            return false;
        }
        self.state = TransactionState::Committing;

        let result = tokio::time::timeout(
            self.timeouts.commit,
            self.rm.commit(self.local_id, &self.instruction),
        )
        .await;

        self.release_lock().await;

        self.state = match result {
            Ok(Ok(true)) => TransactionState::Committed,
            Ok(Ok(false)) => {
                tracing::warn!(local_txn_id = %self.local_id, instruction = %self.instruction, "Commit rejected at apply");
                TransactionState::Aborted
            }
            // The proposal may be on the log already
            Ok(Err(e @ (ClientError::Indeterminate(_) | ClientError::Timeout { .. }))) => {
                tracing::error!(
                    global_txn_id = %self.global_id,
                    local_txn_id = %self.local_id,
                    instruction = %self.instruction,
                    error = %e,
                    "Commit outcome unknown"
                );
                TransactionState::CommitUnknown
            }
            Ok(Err(e)) => {
                tracing::warn!(local_txn_id = %self.local_id, error = %e, "Commit failed");
                // Never reached a replica, so the reservation is still held
                if matches!(e, ClientError::Unavailable(_) | ClientError::NoPeers) {
                    self.rollback_remote().await;
                }
                TransactionState::Aborted
            }
            Err(_) => {
                tracing::error!(
                    global_txn_id = %self.global_id,
                    local_txn_id = %self.local_id,
                    instruction = %self.instruction,
                    "Commit timed out, outcome unknown"
                );
                TransactionState::CommitUnknown
            }
        };
        self.state == TransactionState::Committed
    }

    async fn rollback(&mut self) -> bool {
        let remote = match self.state {
            // Nothing reserved, or already cleaned up by prepare
            TransactionState::Init | TransactionState::PrepareFailed => true,
            TransactionState::Preparing | TransactionState::Prepared => {
                self.rollback_remote().await
            }
            TransactionState::Committing
            | TransactionState::Committed
            | TransactionState::PartiallyCommitted
            | TransactionState::CommitUnknown => {
                tracing::warn!(local_txn_id = %self.local_id, state = %self.state, "Cannot roll back");
                return false;
            }
            TransactionState::Aborted => return true,
        };

        self.release_lock().await;
        self.state = TransactionState::Aborted;
        remote
    }
}
