//! In-memory metadata store

use crate::{
    MetaError, PeerDirectory, PeerInfo, Result, TransactionLog, TransactionLogEntry,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Peer directory and transaction log held in process memory
#[derive(Clone, Default)]
pub struct MemoryMetaStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    buckets: RwLock<HashMap<String, Vec<String>>>,
    peers: RwLock<BTreeMap<String, PeerInfo>>,
    log: RwLock<Vec<TransactionLogEntry>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts with a bucket
    pub fn bucket_count(&self) -> usize {
        self.inner.buckets.read().len()
    }
}

#[async_trait]
impl PeerDirectory for MemoryMetaStore {
    async fn get_peer_bucket(&self, account: &str) -> Result<Option<Vec<String>>> {
        Ok(self.inner.buckets.read().get(account).cloned())
    }

    async fn get_peers_list(&self) -> Result<BTreeMap<String, PeerInfo>> {
        Ok(self.inner.peers.read().clone())
    }

    async fn insert_peer_bucket(&self, account: &str, peers: Vec<String>) -> Result<bool> {
        if peers.is_empty() {
            return Err(MetaError::EmptyBucket(account.to_string()));
        }

        let mut buckets = self.inner.buckets.write();
        if buckets.contains_key(account) {
            return Ok(false);
        }
        tracing::debug!(account, peers = %peers.join(","), "Bucket assigned");
        buckets.insert(account.to_string(), peers);
        Ok(true)
    }

    async fn register_peer(&self, peer: PeerInfo) -> Result<()> {
        tracing::debug!(address = %peer.address, partition = %peer.partition, "Peer registered");
        self.inner.peers.write().insert(peer.address.clone(), peer);
        Ok(())
    }
}

#[async_trait]
impl TransactionLog for MemoryMetaStore {
    async fn create_transaction_entry(&self, entry: TransactionLogEntry) -> Result<()> {
        let mut log = self.inner.log.write();
        if log.iter().any(|e| e.global_txn_id == entry.global_txn_id) {
            return Err(MetaError::DuplicateEntry(entry.global_txn_id));
        }
        log.push(entry);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<TransactionLogEntry>> {
        Ok(self.inner.log.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxnState;
    use mas_common::TransactionId;

    #[tokio::test]
    async fn test_bucket_is_written_once() {
        let store = MemoryMetaStore::new();

        assert_eq!(store.get_peer_bucket("A1").await.unwrap(), None);
        assert!(
            store
                .insert_peer_bucket("A1", vec!["rm.p0.r0".into()])
                .await
                .unwrap()
        );
        assert!(
            !store
                .insert_peer_bucket("A1", vec!["rm.p1.r0".into()])
                .await
                .unwrap()
        );
        assert_eq!(
            store.get_peer_bucket("A1").await.unwrap(),
            Some(vec!["rm.p0.r0".to_string()])
        );
        assert_eq!(
            store.insert_peer_bucket("A2", vec![]).await,
            Err(MetaError::EmptyBucket("A2".into()))
        );
        assert_eq!(store.bucket_count(), 1);
    }

    #[tokio::test]
    async fn test_peers_list() {
        let store = MemoryMetaStore::new();
        store
            .register_peer(PeerInfo::new("rm.p1.r0", "p1"))
            .await
            .unwrap();
        store
            .register_peer(PeerInfo::new("rm.p0.r0", "p0"))
            .await
            .unwrap();

        let peers = store.get_peers_list().await.unwrap();
        assert_eq!(
            peers.keys().cloned().collect::<Vec<_>>(),
            vec!["rm.p0.r0", "rm.p1.r0"]
        );
        assert_eq!(peers["rm.p1.r0"].partition, "p1");
    }

    #[tokio::test]
    async fn test_log_is_append_only() {
        let store = MemoryMetaStore::new();
        let id = TransactionId::new();

        let entry = TransactionLogEntry::new(id, TxnState::Aborted, vec!["A1".into()]);
        store.create_transaction_entry(entry.clone()).await.unwrap();
        assert_eq!(
            store.create_transaction_entry(entry).await,
            Err(MetaError::DuplicateEntry(id))
        );
        assert_eq!(store.entries().await.unwrap().len(), 1);
    }
}
