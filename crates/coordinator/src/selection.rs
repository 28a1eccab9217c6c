//! Partition selection for new accounts

use crate::error::{CoordinatorError, Result};
use mas_meta::PeerInfo;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Policy for choosing the partition a new account lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Uniformly random among eligible partitions
    Random,
    /// Cycle through eligible partitions in name order
    RoundRobin,
}

/// Chooses a bucket of peers from the known peer list
#[derive(Debug)]
pub struct PeerSelector {
    policy: SelectionPolicy,
    next: AtomicUsize,
}

impl PeerSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            next: AtomicUsize::new(0),
        }
    }

    /// Pick one partition with at least `replication_factor` peers and
    /// return that many of its peer addresses
    pub fn select(
        &self,
        peers: &BTreeMap<String, PeerInfo>,
        replication_factor: usize,
    ) -> Result<Vec<String>> {
        let mut partitions: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for peer in peers.values() {
            partitions
                .entry(peer.partition.as_str())
                .or_default()
                .push(peer.address.as_str());
        }

        let eligible: Vec<Vec<&str>> = partitions
            .into_values()
            .filter(|addresses| addresses.len() >= replication_factor)
            .collect();

        let chosen = match self.policy {
            SelectionPolicy::Random => eligible.choose(&mut rand::thread_rng()),
            SelectionPolicy::RoundRobin if eligible.is_empty() => None,
            SelectionPolicy::RoundRobin => {
                let n = self.next.fetch_add(1, Ordering::Relaxed);
                eligible.get(n % eligible.len())
            }
        }
        .ok_or(CoordinatorError::InsufficientPeers {
            needed: replication_factor,
        })?;

        Ok(chosen
            .iter()
            .take(replication_factor)
            .map(|a| a.to_string())
            .collect())
    }
}
