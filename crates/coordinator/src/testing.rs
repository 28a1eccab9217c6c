//! Test doubles for the transaction layer

use crate::transaction::{Transaction, TransactionState};
use async_trait::async_trait;
use mas_common::{AccountInfo, Instruction, TransactionId};
use mas_resource_client::{ClientError, ResourceManagerClient, ResourceManagerConnector};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scripted answer of a fake partition
#[derive(Debug, Clone, Copy, Default)]
pub enum Vote {
    #[default]
    Accept,
    Refuse,
    Error,
    /// The request went out but no outcome came back
    Unknown,
}

/// Resource-manager client answering from a script
#[derive(Default)]
pub struct ScriptedRm {
    prepare: Vote,
    commit: Vote,
    prepares: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl ScriptedRm {
    pub fn prepare_vote(mut self, vote: Vote) -> Self {
        self.prepare = vote;
        self
    }

    pub fn commit_vote(mut self, vote: Vote) -> Self {
        self.commit = vote;
        self
    }

    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    fn answer(vote: Vote) -> Result<bool, ClientError> {
        match vote {
            Vote::Accept => Ok(true),
            Vote::Refuse => Ok(false),
            Vote::Error => Err(ClientError::Unavailable("scripted".into())),
            Vote::Unknown => Err(ClientError::Indeterminate("scripted".into())),
        }
    }
}

#[async_trait]
impl ResourceManagerClient for ScriptedRm {
    async fn prepare(&self, _: TransactionId, _: &Instruction) -> Result<bool, ClientError> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        Self::answer(self.prepare)
    }

    async fn commit(&self, _: TransactionId, _: &Instruction) -> Result<bool, ClientError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Self::answer(self.commit)
    }

    async fn rollback(&self, _: TransactionId, _: &Instruction) -> Result<bool, ClientError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn query(&self, instruction: &Instruction) -> Result<AccountInfo, ClientError> {
        Err(ClientError::OperationError(format!(
            "account {} does not exist",
            instruction.subject_account()
        )))
    }
}

/// Connector routing each bucket to a scripted partition by its first peer
#[derive(Default)]
pub struct ScriptedConnector {
    partitions: Mutex<HashMap<String, Arc<ScriptedRm>>>,
}

impl ScriptedConnector {
    pub fn script(&self, peer: &str, rm: ScriptedRm) -> Arc<ScriptedRm> {
        let rm = Arc::new(rm);
        self.partitions.lock().insert(peer.to_string(), rm.clone());
        rm
    }

    pub fn partition(&self, peer: &str) -> Arc<ScriptedRm> {
        self.partitions
            .lock()
            .entry(peer.to_string())
            .or_default()
            .clone()
    }
}

impl ResourceManagerConnector for ScriptedConnector {
    fn connect(&self, bucket: &[String]) -> Arc<dyn ResourceManagerClient> {
        let peer = bucket.first().cloned().unwrap_or_default();
        self.partition(&peer)
    }
}

/// Shared record of calls made on a [`FakeTxn`]
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<&'static str>>>);

impl EventLog {
    pub fn events(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }

    fn push(&self, event: &'static str) {
        self.0.lock().push(event);
    }
}

/// Sub-transaction that records calls and fails on request
pub struct FakeTxn {
    id: TransactionId,
    key: String,
    state: TransactionState,
    fail_prepare: bool,
    fail_commit: bool,
    unknown_commit: bool,
    log: EventLog,
}

impl FakeTxn {
    pub fn new(key: &str) -> (Self, EventLog) {
        let log = EventLog::default();
        (
            Self {
                id: TransactionId::new(),
                key: key.to_string(),
                state: TransactionState::Init,
                fail_prepare: false,
                fail_commit: false,
                unknown_commit: false,
                log: log.clone(),
            },
            log,
        )
    }

    pub fn fail_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn unknown_commit(mut self) -> Self {
        self.unknown_commit = true;
        self
    }
}

#[async_trait]
impl Transaction for FakeTxn {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn lock_key(&self) -> &str {
        &self.key
    }

    fn state(&self) -> TransactionState {
        self.state
    }

    async fn prepare(&mut self) -> bool {
        self.log.push("prepare");
        self.state = if self.fail_prepare {
            TransactionState::PrepareFailed
        } else {
            TransactionState::Prepared
        };
        !self.fail_prepare
    }

    async fn commit(&mut self) -> bool {
        self.log.push("commit");
        self.state = if self.unknown_commit {
            TransactionState::CommitUnknown
        } else if self.fail_commit {
            TransactionState::Aborted
        } else {
            TransactionState::Committed
        };
        !self.fail_commit && !self.unknown_commit
    }

    async fn rollback(&mut self) -> bool {
        if self.state.is_final() && self.state != TransactionState::Aborted {
            return false;
        }
        self.log.push("rollback");
        self.state = TransactionState::Aborted;
        true
    }
}
