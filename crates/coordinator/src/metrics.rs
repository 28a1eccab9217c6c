//! Coordinator counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome counters, updated once per request
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    committed: AtomicU64,
    aborted: AtomicU64,
    rejected: AtomicU64,
    partial_commits: AtomicU64,
}

/// Point-in-time copy of [`CoordinatorMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Global transactions that committed everywhere
    pub committed: u64,
    /// Global transactions that failed to prepare or commit, with no effect
    pub aborted: u64,
    /// Requests refused by validation before any transaction ran
    pub rejected: u64,
    /// Global transactions committed on some partitions only
    pub partial_commits: u64,
}

impl CoordinatorMetrics {
    pub(crate) fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_partial_commit(&self) {
        self.partial_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            partial_commits: self.partial_commits.load(Ordering::Relaxed),
        }
    }
}
