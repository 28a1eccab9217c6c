//! Transaction coordinator front end
//!
//! Receives account and payment requests, routes them to partitions through
//! the peer directory, runs them as global transactions and records every
//! outcome in the transaction log.

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::global::GlobalTransaction;
use crate::local::{LocalTimeouts, LocalTransaction};
use crate::metrics::{CoordinatorMetrics, MetricsSnapshot};
use crate::reply::{AccountReply, PaymentReply, Reply};
use crate::selection::PeerSelector;
use crate::transaction::{Transaction, TransactionState};
use mas_common::{AccountInfo, Amount, Instruction, PaymentInfo, TransactionId};
use mas_lock::{LockClient, LockGuard};
use mas_meta::{PeerDirectory, PeerInfo, TransactionLog, TransactionLogEntry, TxnState};
use mas_resource_client::{ClientError, ResourceManagerConnector};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

const CANNOT_PREPARE: &str = "Cannot Prepare() global transaction";

/// Everything a request handler needs, built once at startup
pub struct CoordinatorContext {
    pub directory: Arc<dyn PeerDirectory>,
    pub transaction_log: Arc<dyn TransactionLog>,
    pub locks: Arc<dyn LockClient>,
    pub connector: Arc<dyn ResourceManagerConnector>,
    pub config: CoordinatorConfig,
}

/// Distributed transaction coordinator
#[derive(Clone)]
pub struct TxnCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: CoordinatorContext,
    selector: PeerSelector,
    /// Cached peer list, replaced wholesale on refresh
    peers: RwLock<BTreeMap<String, PeerInfo>>,
    metrics: CoordinatorMetrics,
}

impl TxnCoordinator {
    pub fn new(ctx: CoordinatorContext) -> Self {
        let selector = PeerSelector::new(ctx.config.selection);
        Self {
            inner: Arc::new(Inner {
                ctx,
                selector,
                peers: RwLock::new(BTreeMap::new()),
                metrics: CoordinatorMetrics::default(),
            }),
        }
    }

    fn ctx(&self) -> &CoordinatorContext {
        &self.inner.ctx
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.ctx.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Reload the cached peer list from the directory
    pub async fn refresh_peer_list(&self) -> Result<usize> {
        let peers = self.ctx().directory.get_peers_list().await?;
        let count = peers.len();
        *self.inner.peers.write() = peers;
        tracing::info!(peers = count, "Peer list refreshed");
        Ok(count)
    }

    async fn assign_peers(&self) -> Result<Vec<String>> {
        if self.inner.peers.read().is_empty() {
            self.refresh_peer_list().await?;
        }
        let peers = self.inner.peers.read();
        self.inner
            .selector
            .select(&peers, self.config().replication_factor)
    }

    fn timeouts(&self) -> LocalTimeouts {
        LocalTimeouts {
            prepare: self.config().rpc_timeout,
            commit: self.config().commit_timeout,
        }
    }

    fn local(
        &self,
        bucket: &[String],
        instruction: Instruction,
        global_id: TransactionId,
    ) -> Box<dyn Transaction> {
        Box::new(LocalTransaction::new(
            self.ctx().connector.connect(bucket),
            self.ctx().locks.clone(),
            instruction,
            global_id,
            self.timeouts(),
        ))
    }

    async fn log_outcome(&self, entry: TransactionLogEntry) -> Result<()> {
        tracing::debug!(
            global_txn_id = %entry.global_txn_id,
            state = %entry.state,
            accounts = %entry.accounts_csv(),
            "Transaction logged"
        );
        self.ctx().transaction_log.create_transaction_entry(entry).await?;
        Ok(())
    }

    /// Count and log a validation rejection, handing back the reason
    fn reject(&self, reason: impl Into<String>) -> String {
        let reason = reason.into();
        tracing::info!(%reason, "Request rejected");
        self.inner.metrics.record_rejected();
        reason
    }

    /// Read an account from the partition that owns it
    pub async fn get_account(&self, number: &str) -> Result<AccountReply> {
        let Some(bucket) = self.ctx().directory.get_peer_bucket(number).await? else {
            return Ok(AccountReply::fail("Account doesn't exist"));
        };

        let rm = self.ctx().connector.connect(&bucket);
        let instruction = Instruction::query_account(number);
        let query = rm.query(&instruction);
        match tokio::time::timeout(self.config().rpc_timeout, query).await {
            Ok(Ok(account)) => Ok(AccountReply::ok(account)),
            Ok(Err(ClientError::OperationError(reason))) => Ok(AccountReply::fail(reason)),
            Ok(Err(e)) => Ok(AccountReply::fail(e.to_string())),
            Err(_) => Ok(AccountReply::fail(format!("Query for {} timed out", number))),
        }
    }

    /// Create an account on a newly assigned partition
    pub async fn create_account(&self, number: &str, balance: Amount) -> Result<AccountReply> {
        if number.trim().is_empty() {
            return Ok(AccountReply::fail(self.reject("Account number must not be empty")));
        }
        if balance.is_negative() {
            return Ok(AccountReply::fail(self.reject("Opening balance must not be negative")));
        }
        if self.ctx().directory.get_peer_bucket(number).await?.is_some() {
            return Ok(AccountReply::fail(self.reject("Account already exists")));
        }

        let global_id = TransactionId::new();

        // Serializes creations of one number end to end; the account lock
        // itself is released at commit, before the bucket is written
        let Some(creation) = LockGuard::acquire(
            self.ctx().locks.clone(),
            format!("create/{}", number),
            global_id,
        )
        .await?
        else {
            self.inner.metrics.record_aborted();
            return Ok(AccountReply::fail(format!(
                "Account {} is being created concurrently",
                number
            )));
        };

        let reply = self.run_create(global_id, number, balance).await;
        creation.release().await;
        reply
    }

    async fn run_create(
        &self,
        global_id: TransactionId,
        number: &str,
        balance: Amount,
    ) -> Result<AccountReply> {
        let peers = self.assign_peers().await?;
        let account = AccountInfo::new(number, balance);
        let instruction = Instruction::create_account(global_id, account.clone());
        let accounts = vec![number.to_string()];

        let mut txn = GlobalTransaction::new(global_id, vec![self.local(&peers, instruction, global_id)]);

        if !txn.prepare().await {
            self.inner.metrics.record_aborted();
            self.log_outcome(TransactionLogEntry::new(global_id, TxnState::Aborted, accounts))
                .await?;
            return Ok(AccountReply::fail(CANNOT_PREPARE));
        }

        // A concurrent creation may have finished while we prepared
        if let Some(bucket) = self.ctx().directory.get_peer_bucket(number).await? {
            txn.rollback().await;
            self.inner.metrics.record_aborted();
            self.log_outcome(TransactionLogEntry::new(global_id, TxnState::Aborted, accounts))
                .await?;
            return Ok(AccountReply::fail(format!(
                "Account already exists, id = {} bucket = {}",
                number,
                bucket.join(",")
            )));
        }

        if txn.begin() && txn.commit().await {
            if !self.ctx().directory.insert_peer_bucket(number, peers.clone()).await? {
                return self
                    .creation_anomaly(
                        global_id,
                        number,
                        accounts,
                        Vec::new(),
                        format!("Account {} committed but its bucket was already taken", number),
                    )
                    .await;
            }
            self.inner.metrics.record_committed();
            self.log_outcome(TransactionLogEntry::new(global_id, TxnState::Committed, accounts))
                .await?;
            tracing::info!(global_txn_id = %global_id, account = %number, bucket = %peers.join(","), "Account created");
            return Ok(AccountReply::ok(account));
        }

        if txn.state() == TransactionState::PartiallyCommitted {
            // The account may exist on these peers; pin the number to them
            if !self.ctx().directory.insert_peer_bucket(number, peers).await? {
                tracing::warn!(global_txn_id = %global_id, account = %number, "Bucket already taken");
            }
            let failed = txn.failed_local_txns().to_vec();
            return self
                .creation_anomaly(
                    global_id,
                    number,
                    accounts,
                    failed,
                    format!("Outcome of creating account {} is unknown", number),
                )
                .await;
        }

        txn.rollback().await;
        self.inner.metrics.record_aborted();
        self.log_outcome(TransactionLogEntry::new(global_id, TxnState::Aborted, accounts))
            .await?;
        Ok(AccountReply::fail("Account creation aborted"))
    }

    async fn creation_anomaly(
        &self,
        global_id: TransactionId,
        number: &str,
        accounts: Vec<String>,
        failed: Vec<TransactionId>,
        reason: String,
    ) -> Result<AccountReply> {
        tracing::error!(
            target: "mas::anomaly",
            global_txn_id = %global_id,
            account = %number,
            failed_local_txns = ?failed,
            %reason,
            "Account creation needs reconciliation"
        );
        self.inner.metrics.record_partial_commit();
        self.log_outcome(
            TransactionLogEntry::new(global_id, TxnState::PartiallyCommitted, accounts)
                .with_failed(failed),
        )
        .await?;
        Ok(AccountReply::fail(reason))
    }

    /// Move `amount` from one account to another atomically
    pub async fn create_payment(&self, from: &str, to: &str, amount: Amount) -> Result<PaymentReply> {
        if from == to {
            return Ok(PaymentReply::fail(self.reject("Cannot send money to yourself")));
        }
        if !amount.is_positive() {
            return Ok(PaymentReply::fail(self.reject("Payment amount must be positive")));
        }
        let Some(from_bucket) = self.ctx().directory.get_peer_bucket(from).await? else {
            return Ok(PaymentReply::fail(self.reject(format!("From account {} doesn't exist", from))));
        };
        let Some(to_bucket) = self.ctx().directory.get_peer_bucket(to).await? else {
            return Ok(PaymentReply::fail(self.reject(format!("To account {} doesn't exist", to))));
        };

        let global_id = TransactionId::new();
        let payment = PaymentInfo::new(from, to, amount);
        let payment_id = payment.id.clone();
        let accounts = vec![from.to_string(), to.to_string()];

        // Debit first: a failed debit commit then aborts cleanly
        let mut txn = GlobalTransaction::new(
            global_id,
            vec![
                self.local(
                    &from_bucket,
                    Instruction::send_payment(global_id, payment.clone()),
                    global_id,
                ),
                self.local(
                    &to_bucket,
                    Instruction::receive_payment(global_id, payment),
                    global_id,
                ),
            ],
        );

        if !txn.prepare().await {
            self.inner.metrics.record_aborted();
            self.log_outcome(TransactionLogEntry::new(global_id, TxnState::Aborted, accounts))
                .await?;
            return Ok(PaymentReply::fail(CANNOT_PREPARE));
        }

        if txn.begin() && txn.commit().await {
            tracing::info!(global_txn_id = %global_id, %from, %to, %amount, "Payment committed");
            self.inner.metrics.record_committed();
            self.log_outcome(TransactionLogEntry::new(global_id, TxnState::Committed, accounts))
                .await?;
            return Ok(PaymentReply::new(Reply::Committed, payment_id));
        }

        let failed = txn.failed_local_txns().to_vec();
        if txn.state() == TransactionState::PartiallyCommitted {
            tracing::error!(
                target: "mas::anomaly",
                global_txn_id = %global_id,
                failed_local_txns = ?failed,
                accounts = %accounts.join(","),
                "Payment partially committed; reconciliation required"
            );
            self.inner.metrics.record_partial_commit();
            self.log_outcome(
                TransactionLogEntry::new(global_id, TxnState::PartiallyCommitted, accounts)
                    .with_failed(failed),
            )
            .await?;
            return Ok(PaymentReply::new(
                Reply::fail(format!(
                    "Global transaction {} partially committed",
                    global_id
                )),
                payment_id,
            ));
        }

        tracing::info!(global_txn_id = %global_id, "Payment rolled back");
        txn.rollback().await;
        self.inner.metrics.record_aborted();
        self.log_outcome(
            TransactionLogEntry::new(global_id, TxnState::Aborted, accounts).with_failed(failed),
        )
        .await?;
        Ok(PaymentReply::new(Reply::Aborted, payment_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedConnector, ScriptedRm, Vote};
    use async_trait::async_trait;
    use mas_lock::LockService;
    use mas_meta::MemoryMetaStore;
    use std::time::Duration;

    /// Directory whose bucket writes always lose to another writer
    struct TakenBuckets(MemoryMetaStore);

    #[async_trait]
    impl PeerDirectory for TakenBuckets {
        async fn get_peer_bucket(&self, account: &str) -> mas_meta::Result<Option<Vec<String>>> {
            self.0.get_peer_bucket(account).await
        }

        async fn get_peers_list(&self) -> mas_meta::Result<BTreeMap<String, PeerInfo>> {
            self.0.get_peers_list().await
        }

        async fn insert_peer_bucket(&self, _: &str, _: Vec<String>) -> mas_meta::Result<bool> {
            Ok(false)
        }

        async fn register_peer(&self, peer: PeerInfo) -> mas_meta::Result<()> {
            self.0.register_peer(peer).await
        }
    }

    struct Harness {
        coordinator: TxnCoordinator,
        meta: MemoryMetaStore,
        locks: LockService,
        connector: Arc<ScriptedConnector>,
    }

    async fn harness() -> Harness {
        let meta = MemoryMetaStore::new();
        harness_with(meta.clone(), Arc::new(meta)).await
    }

    async fn harness_with(meta: MemoryMetaStore, directory: Arc<dyn PeerDirectory>) -> Harness {
        meta.register_peer(PeerInfo::new("p0.r0", "p0")).await.unwrap();
        meta.register_peer(PeerInfo::new("p1.r0", "p1")).await.unwrap();
        let locks = LockService::new(Duration::from_millis(200));
        let connector = Arc::new(ScriptedConnector::default());
        let coordinator = TxnCoordinator::new(CoordinatorContext {
            directory,
            transaction_log: Arc::new(meta.clone()),
            locks: Arc::new(locks.clone()),
            connector: connector.clone(),
            config: CoordinatorConfig::default()
                .with_rpc_timeout(Duration::from_millis(500))
                .with_commit_timeout(Duration::from_millis(500)),
        });
        Harness {
            coordinator,
            meta,
            locks,
            connector,
        }
    }

    async fn place(h: &Harness, account: &str, peer: &str) {
        h.meta
            .insert_peer_bucket(account, vec![peer.to_string()])
            .await
            .unwrap();
    }

    async fn last_entry(h: &Harness) -> TransactionLogEntry {
        h.meta.entries().await.unwrap().pop().unwrap()
    }

    #[tokio::test]
    async fn test_create_account_assigns_bucket() {
        let h = harness().await;

        let reply = h
            .coordinator
            .create_account("A1", Amount::from(100))
            .await
            .unwrap();

        assert_eq!(reply.message, Reply::Ok);
        assert_eq!(reply.account.unwrap().balance, Amount::from(100));
        assert!(h.meta.get_peer_bucket("A1").await.unwrap().is_some());
        let entry = last_entry(&h).await;
        assert_eq!(entry.state, TxnState::Committed);
        assert_eq!(entry.accounts_involved, vec!["A1".to_string()]);
        assert_eq!(h.locks.held_count(), 0);
        assert_eq!(h.coordinator.metrics().committed, 1);
    }

    #[tokio::test]
    async fn test_create_existing_account_is_rejected() {
        let h = harness().await;
        place(&h, "A1", "p0.r0").await;

        let reply = h
            .coordinator
            .create_account("A1", Amount::zero())
            .await
            .unwrap();

        assert_eq!(reply.message, Reply::fail("Account already exists"));
        assert!(h.meta.entries().await.unwrap().is_empty());
        assert_eq!(h.connector.partition("p0.r0").prepares(), 0);
        assert_eq!(h.coordinator.metrics().rejected, 1);
    }

    #[tokio::test]
    async fn test_create_account_prepare_refused() {
        let h = harness().await;
        h.connector
            .script("p0.r0", ScriptedRm::default().prepare_vote(Vote::Refuse));
        h.connector
            .script("p1.r0", ScriptedRm::default().prepare_vote(Vote::Refuse));

        let reply = h
            .coordinator
            .create_account("A1", Amount::from(10))
            .await
            .unwrap();

        assert_eq!(reply.message, Reply::fail(CANNOT_PREPARE));
        assert!(h.meta.get_peer_bucket("A1").await.unwrap().is_none());
        assert_eq!(last_entry(&h).await.state, TxnState::Aborted);
        assert_eq!(h.locks.held_count(), 0);
    }

    #[tokio::test]
    async fn test_get_unknown_account() {
        let h = harness().await;
        let reply = h.coordinator.get_account("nobody").await.unwrap();
        assert_eq!(reply.message, Reply::fail("Account doesn't exist"));
    }

    #[tokio::test]
    async fn test_self_payment_is_rejected() {
        let h = harness().await;
        place(&h, "A1", "p0.r0").await;

        let reply = h
            .coordinator
            .create_payment("A1", "A1", Amount::from(5))
            .await
            .unwrap();

        assert_eq!(reply.message, Reply::fail("Cannot send money to yourself"));
        assert!(reply.payment_id.is_none());
        assert!(h.meta.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payment_to_missing_account_is_rejected() {
        let h = harness().await;
        place(&h, "A1", "p0.r0").await;

        let reply = h
            .coordinator
            .create_payment("A1", "A9", Amount::from(5))
            .await
            .unwrap();

        assert_eq!(reply.message, Reply::fail("To account A9 doesn't exist"));
        assert_eq!(h.connector.partition("p0.r0").prepares(), 0);
    }

    #[tokio::test]
    async fn test_payment_commits_on_both_partitions() {
        let h = harness().await;
        place(&h, "A1", "p0.r0").await;
        place(&h, "A2", "p1.r0").await;

        let reply = h
            .coordinator
            .create_payment("A1", "A2", Amount::from(40))
            .await
            .unwrap();

        assert_eq!(reply.message, Reply::Committed);
        assert!(reply.payment_id.is_some());
        assert_eq!(h.connector.partition("p0.r0").commits(), 1);
        assert_eq!(h.connector.partition("p1.r0").commits(), 1);
        let entry = last_entry(&h).await;
        assert_eq!(entry.state, TxnState::Committed);
        assert_eq!(entry.accounts_csv(), "A1,A2");
        assert_eq!(h.locks.held_count(), 0);
    }

    #[tokio::test]
    async fn test_payment_prepare_refused_aborts() {
        let h = harness().await;
        place(&h, "A1", "p0.r0").await;
        place(&h, "A2", "p1.r0").await;
        let from = h
            .connector
            .script("p0.r0", ScriptedRm::default().prepare_vote(Vote::Refuse));
        let to = h.connector.partition("p1.r0");

        let reply = h
            .coordinator
            .create_payment("A1", "A2", Amount::from(50))
            .await
            .unwrap();

        assert_eq!(reply.message, Reply::fail(CANNOT_PREPARE));
        assert_eq!(from.commits() + to.commits(), 0);
        assert_eq!(last_entry(&h).await.state, TxnState::Aborted);
        assert_eq!(h.locks.held_count(), 0);
    }

    #[tokio::test]
    async fn test_debit_commit_failure_aborts_cleanly() {
        let h = harness().await;
        place(&h, "A1", "p0.r0").await;
        place(&h, "A2", "p1.r0").await;
        h.connector
            .script("p0.r0", ScriptedRm::default().commit_vote(Vote::Error));
        let to = h.connector.partition("p1.r0");

        let reply = h
            .coordinator
            .create_payment("A1", "A2", Amount::from(10))
            .await
            .unwrap();

        assert_eq!(reply.message, Reply::Aborted);
        assert_eq!(to.commits(), 0);
        assert_eq!(to.rollbacks(), 1);
        let entry = last_entry(&h).await;
        assert_eq!(entry.state, TxnState::Aborted);
        assert_eq!(entry.failed_local_txns.len(), 2);
        assert_eq!(h.coordinator.metrics().aborted, 1);
    }

    #[tokio::test]
    async fn test_credit_commit_failure_is_partial() {
        let h = harness().await;
        place(&h, "A1", "p0.r0").await;
        place(&h, "A2", "p1.r0").await;
        h.connector
            .script("p1.r0", ScriptedRm::default().commit_vote(Vote::Error));

        let reply = h
            .coordinator
            .create_payment("A1", "A2", Amount::from(10))
            .await
            .unwrap();

        assert!(matches!(reply.message, Reply::Fail(_)));
        let entry = last_entry(&h).await;
        assert_eq!(entry.state, TxnState::PartiallyCommitted);
        assert_eq!(entry.failed_local_txns.len(), 1);
        assert_eq!(h.coordinator.metrics().partial_commits, 1);
    }

    #[tokio::test]
    async fn test_unknown_debit_outcome_is_not_an_abort() {
        let h = harness().await;
        place(&h, "A1", "p0.r0").await;
        place(&h, "A2", "p1.r0").await;
        h.connector
            .script("p0.r0", ScriptedRm::default().commit_vote(Vote::Unknown));

        let reply = h
            .coordinator
            .create_payment("A1", "A2", Amount::from(40))
            .await
            .unwrap();

        assert_ne!(reply.message, Reply::Aborted);
        assert!(matches!(reply.message, Reply::Fail(_)));
        let entry = last_entry(&h).await;
        assert_eq!(entry.state, TxnState::PartiallyCommitted);
        assert_eq!(entry.failed_local_txns.len(), 2);
        let metrics = h.coordinator.metrics();
        assert_eq!(metrics.aborted, 0);
        assert_eq!(metrics.partial_commits, 1);
        assert_eq!(h.locks.held_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_create_outcome_pins_bucket() {
        let h = harness().await;
        h.connector
            .script("p0.r0", ScriptedRm::default().commit_vote(Vote::Unknown));
        h.connector
            .script("p1.r0", ScriptedRm::default().commit_vote(Vote::Unknown));

        let reply = h
            .coordinator
            .create_account("A1", Amount::from(10))
            .await
            .unwrap();

        assert_eq!(
            reply.message,
            Reply::fail("Outcome of creating account A1 is unknown")
        );
        assert!(h.meta.get_peer_bucket("A1").await.unwrap().is_some());
        assert_eq!(last_entry(&h).await.state, TxnState::PartiallyCommitted);
        assert_eq!(h.coordinator.metrics().partial_commits, 1);

        // The number cannot be created again on another partition
        let again = h
            .coordinator
            .create_account("A1", Amount::from(10))
            .await
            .unwrap();
        assert_eq!(again.message, Reply::fail("Account already exists"));
    }

    #[tokio::test]
    async fn test_lost_bucket_write_is_not_reported_as_created() {
        let meta = MemoryMetaStore::new();
        let h = harness_with(meta.clone(), Arc::new(TakenBuckets(meta))).await;

        let reply = h
            .coordinator
            .create_account("A1", Amount::from(10))
            .await
            .unwrap();

        assert_eq!(
            reply.message,
            Reply::fail("Account A1 committed but its bucket was already taken")
        );
        assert!(reply.account.is_none());
        assert_eq!(last_entry(&h).await.state, TxnState::PartiallyCommitted);
        let metrics = h.coordinator.metrics();
        assert_eq!(metrics.committed, 0);
        assert_eq!(metrics.partial_commits, 1);
    }
}
