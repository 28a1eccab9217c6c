//! Replicated state-machine applier
//!
//! One applier runs per partition replica. It turns the group's ordered
//! commit stream into account state:
//! - `LoadSnapshot` control entries reload the latest stored snapshot
//! - data entries are decoded as [`Proposal`]s and applied in log order
//!
//! All mutation happens on the task running [`Applier::run`] under the store's
//! write lock. Entries at or below the applied index are skipped, so
//! replaying a log prefix over a recovered snapshot converges on the same
//! state as applying it once.

use crate::storage::AccountStore;
use crate::ApplierError;
use mas_common::{AccountInfo, Instruction, Proposal, ProposalId};
use mas_engine::{CommitEntry, GroupHandle, ReplicationError};
use mas_snapshot::{SnapshotMetadata, SnapshotStore};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

type Result<T> = std::result::Result<T, ApplierError>;

/// Applier tuning
#[derive(Debug, Clone)]
pub struct ApplierConfig {
    /// Entries between automatic snapshots; 0 disables them
    pub snapshot_interval: u64,
    /// How long `propose_and_wait` waits for its entry to apply
    pub apply_timeout: Duration,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: 100,
            apply_timeout: Duration::from_secs(5),
        }
    }
}

impl ApplierConfig {
    pub fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn with_apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self
    }
}

/// Result of applying one proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The instruction was ordered but failed validation; nothing changed
    Rejected(String),
}

/// Where the apply loop is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplierPhase {
    /// Not yet consuming
    Idle,
    /// Loading a snapshot after a control signal
    Replaying,
    /// Steady state
    Applying,
    /// Commit stream closed
    Stopped,
    /// Stopped on a fatal error
    Failed(String),
}

impl fmt::Display for ApplierPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplierPhase::Idle => write!(f, "idle"),
            ApplierPhase::Replaying => write!(f, "replaying"),
            ApplierPhase::Applying => write!(f, "applying"),
            ApplierPhase::Stopped => write!(f, "stopped"),
            ApplierPhase::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Per-replica applier
#[derive(Clone)]
pub struct Applier {
    group: String,
    member: String,
    config: ApplierConfig,

    /// Partition state; written only by the apply path
    store: Arc<RwLock<AccountStore>>,

    /// Outbound proposals into the replication group
    proposals: mpsc::UnboundedSender<Vec<u8>>,

    /// Proposals from this replica awaiting their outcome
    pending: Arc<Mutex<HashMap<ProposalId, oneshot::Sender<ApplyOutcome>>>>,

    snapshots: Arc<dyn SnapshotStore>,

    phase: Arc<Mutex<ApplierPhase>>,
    healthy: Arc<AtomicBool>,
}

impl Applier {
    /// Create an applier proposing through `handle`'s proposal channel.
    /// The handle's streams are consumed later by [`Applier::run`].
    pub fn new(
        handle: &GroupHandle,
        snapshots: Arc<dyn SnapshotStore>,
        config: ApplierConfig,
    ) -> Self {
        Self {
            group: handle.group.clone(),
            member: handle.member.clone(),
            config,
            store: Arc::new(RwLock::new(AccountStore::new())),
            proposals: handle.proposals.clone(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            snapshots,
            phase: Arc::new(Mutex::new(ApplierPhase::Idle)),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn config(&self) -> &ApplierConfig {
        &self.config
    }

    /// Hand an instruction to the replication layer without waiting
    pub fn propose(&self, instruction: Instruction) -> Result<ProposalId> {
        let proposal = Proposal::new(instruction);
        let id = proposal.id;
        self.send(&proposal)?;
        Ok(id)
    }

    /// Propose an instruction and wait until this replica has applied it
    pub async fn propose_and_wait(
        &self,
        instruction: Instruction,
        timeout: Duration,
    ) -> Result<ApplyOutcome> {
        if !self.is_healthy() {
            return Err(ApplierError::Stopped);
        }

        let proposal = Proposal::new(instruction);
        let id = proposal.id;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.send(&proposal) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(ApplierError::Stopped),
            Err(_) => {
                // The entry may still apply later; nobody is waiting for it
                self.pending.lock().remove(&id);
                tracing::warn!(group = %self.group, proposal = %id, "Proposal outcome timed out");
                Err(ApplierError::Timeout)
            }
        }
    }

    fn send(&self, proposal: &Proposal) -> Result<()> {
        let bytes = proposal
            .encode()
            .map_err(|e| ApplierError::Encode(e.to_string()))?;
        self.proposals
            .send(bytes)
            .map_err(|_| ApplierError::ProposalsClosed)
    }

    /// Consume the group's commit and error streams until the commit stream
    /// closes (`Ok`) or a fatal error occurs (`Err`). On error the applier
    /// is marked unhealthy and every waiting proposer is released.
    pub async fn run(&self, mut handle: GroupHandle) -> Result<()> {
        tracing::info!(group = %self.group, member = %self.member, "Applier started");

        let result = self.consume(&mut handle).await;

        match &result {
            Ok(()) => {
                tracing::info!(group = %self.group, member = %self.member, "Commit stream closed");
                *self.phase.lock() = ApplierPhase::Stopped;
            }
            Err(e) => {
                tracing::error!(group = %self.group, member = %self.member, error = %e, "Applier stopped");
                self.healthy.store(false, Ordering::Release);
                *self.phase.lock() = ApplierPhase::Failed(e.to_string());
            }
        }

        // Waiters see `Stopped`
        self.pending.lock().clear();
        result
    }

    async fn consume(&self, handle: &mut GroupHandle) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                Some(error) = handle.errors.recv() => {
                    return Err(replication_failure(error));
                }

                entry = handle.commits.recv() => match entry {
                    Some(CommitEntry::LoadSnapshot) => self.load_latest_snapshot()?,
                    Some(CommitEntry::Entry { index, data }) => self.apply_entry(index, &data)?,
                    None => {
                        // A failed group closes the stream right after
                        // reporting; do not mistake that for a clean stop
                        if let Ok(error) = handle.errors.try_recv() {
                            return Err(replication_failure(error));
                        }
                        return Ok(());
                    }
                },
            }
        }
    }

    fn load_latest_snapshot(&self) -> Result<()> {
        *self.phase.lock() = ApplierPhase::Replaying;

        let snapshot = self
            .snapshots
            .load(&self.group)
            .map_err(|e| ApplierError::SnapshotLoad(e.to_string()))?;

        match snapshot {
            Some(snapshot) if snapshot.metadata.index > self.applied_index() => {
                self.recover_from_snapshot(&snapshot.data)?;
                tracing::info!(
                    group = %self.group,
                    member = %self.member,
                    index = snapshot.metadata.index,
                    "Recovered from snapshot"
                );
            }
            Some(snapshot) => {
                tracing::debug!(
                    group = %self.group,
                    index = snapshot.metadata.index,
                    applied = self.applied_index(),
                    "Snapshot not newer than local state"
                );
            }
            None => {
                tracing::debug!(group = %self.group, member = %self.member, "No snapshot, starting empty");
            }
        }

        *self.phase.lock() = ApplierPhase::Applying;
        Ok(())
    }

    fn apply_entry(&self, index: u64, data: &[u8]) -> Result<()> {
        if index <= self.applied_index() {
            tracing::trace!(group = %self.group, index, "Skipping already applied entry");
            return Ok(());
        }

        let proposal = Proposal::decode(data).map_err(|e| ApplierError::Decode {
            index,
            reason: e.to_string(),
        })?;

        let outcome = {
            let mut store = self.store.write();
            let outcome = match store.apply(&proposal.instruction) {
                Ok(()) => ApplyOutcome::Applied,
                Err(e) => ApplyOutcome::Rejected(e.to_string()),
            };
            store.set_applied_index(index);
            outcome
        };

        match &outcome {
            ApplyOutcome::Applied => tracing::debug!(
                group = %self.group,
                member = %self.member,
                index,
                instruction = %proposal.instruction,
                "Applied"
            ),
            ApplyOutcome::Rejected(reason) => tracing::debug!(
                group = %self.group,
                member = %self.member,
                index,
                instruction = %proposal.instruction,
                %reason,
                "Rejected"
            ),
        }

        let interval = self.config.snapshot_interval;
        if interval > 0
            && index % interval == 0
            && let Err(e) = self.save_snapshot()
        {
            // The log still holds everything; a missed snapshot only costs replay time
            tracing::warn!(group = %self.group, index, error = %e, "Automatic snapshot failed");
        }

        if let Some(waiter) = self.pending.lock().remove(&proposal.id) {
            let _ = waiter.send(outcome);
        }

        Ok(())
    }

    /// Apply an instruction directly to local state, outside the log
    pub fn apply_instruction(&self, instruction: &Instruction) -> ApplyOutcome {
        match self.store.write().apply(instruction) {
            Ok(()) => ApplyOutcome::Applied,
            Err(e) => ApplyOutcome::Rejected(e.to_string()),
        }
    }

    /// Replace local state with a snapshot payload
    pub fn recover_from_snapshot(&self, data: &[u8]) -> Result<()> {
        let restored = AccountStore::from_snapshot(data).map_err(ApplierError::SnapshotLoad)?;
        *self.store.write() = restored;
        Ok(())
    }

    /// Serialize the current state; returns the log index it reflects
    pub fn snapshot(&self) -> Result<(u64, Vec<u8>)> {
        let store = self.store.read();
        let data = store.to_snapshot().map_err(ApplierError::SnapshotEncode)?;
        Ok((store.applied_index(), data))
    }

    /// Write the current state to the snapshot store
    pub fn save_snapshot(&self) -> Result<SnapshotMetadata> {
        let (index, data) = self.snapshot()?;
        let metadata = self
            .snapshots
            .save(&self.group, index, data)
            .map_err(|e| ApplierError::SnapshotSave(e.to_string()))?;
        tracing::debug!(group = %self.group, member = %self.member, index, "Snapshot saved");
        Ok(metadata)
    }

    /// Copy of the current partition state
    pub fn state(&self) -> AccountStore {
        self.store.read().clone()
    }

    pub fn account(&self, number: &str) -> Option<AccountInfo> {
        self.store.read().account(number).cloned()
    }

    pub fn applied_index(&self) -> u64 {
        self.store.read().applied_index()
    }

    pub fn phase(&self) -> ApplierPhase {
        self.phase.lock().clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

fn replication_failure(error: ReplicationError) -> ApplierError {
    ApplierError::Replication(format!("{}: {}", error.group, error.reason))
}
