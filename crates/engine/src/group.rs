//! Replication groups
//!
//! A group is one partition's ordered log. Proposals from any member are
//! sequenced by a single task, stamped with a log index and fanned out to
//! every member's commit stream in the same order.

use crate::{MockEngineError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Item delivered on a member's commit stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitEntry {
    /// A committed entry and its position in the log
    Entry { index: u64, data: Vec<u8> },
    /// Control signal: the member must load the latest snapshot before
    /// consuming further entries
    LoadSnapshot,
}

/// Fatal replication failure reported on a member's error stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationError {
    pub group: String,
    pub reason: String,
}

/// Channels handed to one member of a replication group
pub struct GroupHandle {
    pub group: String,
    pub member: String,
    /// Outbound proposals (opaque serialized entries)
    pub proposals: mpsc::UnboundedSender<Vec<u8>>,
    /// Ordered commit stream
    pub commits: mpsc::UnboundedReceiver<CommitEntry>,
    /// Fatal errors from the replication layer
    pub errors: mpsc::UnboundedReceiver<ReplicationError>,
}

struct Member {
    name: String,
    commits: mpsc::UnboundedSender<CommitEntry>,
    errors: mpsc::UnboundedSender<ReplicationError>,
}

/// Shared state of a replication group
pub(crate) struct ReplicationLog {
    name: String,

    /// Retained entries, oldest first
    entries: Vec<(u64, Vec<u8>)>,

    /// Index assigned to the next appended entry
    next_index: u64,

    members: Vec<Member>,

    /// Set once the group has failed; no further appends are accepted
    failure: Option<String>,

    /// Sender cloned into every member handle
    proposals: mpsc::UnboundedSender<Vec<u8>>,
}

impl ReplicationLog {
    /// Create the log and start its sequencer task
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start(name: String) -> Arc<Mutex<Self>> {
        let (proposals, mut inbound) = mpsc::unbounded_channel::<Vec<u8>>();

        let log = Arc::new(Mutex::new(Self {
            name,
            entries: Vec::new(),
            next_index: 1,
            members: Vec::new(),
            failure: None,
            proposals,
        }));

        // Holds only a weak reference so dropping the engine ends the task
        let weak = Arc::downgrade(&log);
        tokio::spawn(async move {
            while let Some(data) = inbound.recv().await {
                let Some(log) = weak.upgrade() else {
                    break;
                };
                log.lock().append(data);
            }
        });

        log
    }

    fn append(&mut self, data: Vec<u8>) {
        if self.failure.is_some() {
            tracing::debug!(group = %self.name, "Dropping proposal for failed group");
            return;
        }

        let index = self.next_index;
        self.next_index += 1;

        for member in &self.members {
            let _ = member.commits.send(CommitEntry::Entry {
                index,
                data: data.clone(),
            });
        }
        self.members.retain(|m| !m.commits.is_closed());

        self.entries.push((index, data));
    }

    /// Register a member; it first sees the snapshot signal, then every
    /// retained entry, then live entries
    pub(crate) fn open(&mut self, member: String) -> Result<GroupHandle> {
        if let Some(reason) = &self.failure {
            return Err(MockEngineError::GroupFailed(format!(
                "{}: {}",
                self.name, reason
            )));
        }

        let (commits_tx, commits_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let _ = commits_tx.send(CommitEntry::LoadSnapshot);
        for (index, data) in &self.entries {
            let _ = commits_tx.send(CommitEntry::Entry {
                index: *index,
                data: data.clone(),
            });
        }

        self.members.push(Member {
            name: member.clone(),
            commits: commits_tx,
            errors: errors_tx,
        });

        Ok(GroupHandle {
            group: self.name.clone(),
            member,
            proposals: self.proposals.clone(),
            commits: commits_rx,
            errors: errors_rx,
        })
    }

    pub(crate) fn last_index(&self) -> u64 {
        self.next_index - 1
    }

    /// Drop retained entries up to and including `through`
    pub(crate) fn compact(&mut self, through: u64) {
        self.entries.retain(|(index, _)| *index > through);
    }

    /// Ask every member to reload the latest snapshot
    pub(crate) fn signal_snapshot(&mut self) {
        for member in &self.members {
            let _ = member.commits.send(CommitEntry::LoadSnapshot);
        }
    }

    /// Report a fatal failure to every member and close their streams
    pub(crate) fn fail(&mut self, reason: String) {
        tracing::warn!(group = %self.name, %reason, "Replication group failed");
        for member in self.members.drain(..) {
            tracing::debug!(group = %self.name, member = %member.name, "Closing commit stream");
            let _ = member.errors.send(ReplicationError {
                group: self.name.clone(),
                reason: reason.clone(),
            });
        }
        self.failure = Some(reason);
    }

    /// Close every member's streams without an error
    pub(crate) fn close(&mut self) {
        self.members.clear();
    }
}
