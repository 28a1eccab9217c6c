//! Coordinator metadata
//!
//! Two capabilities backed by the metadata store:
//! - [`PeerDirectory`]: which resource-manager peers own an account (its
//!   bucket), and the full list of known peers
//! - [`TransactionLog`]: the append-only audit record of resolved global
//!   transactions

mod error;
mod memory;
mod types;

pub use error::{MetaError, Result};
pub use memory::MemoryMetaStore;
pub use types::{PeerInfo, TransactionLogEntry, TxnState};

use async_trait::async_trait;
use std::collections::BTreeMap;

/// Account to peer-bucket routing
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Peers owning `account`; `None` when the account does not exist
    async fn get_peer_bucket(&self, account: &str) -> Result<Option<Vec<String>>>;

    /// Every known peer keyed by address
    async fn get_peers_list(&self) -> Result<BTreeMap<String, PeerInfo>>;

    /// Assign `account` to `peers`. Returns `false` without changing
    /// anything when the account already has a bucket.
    async fn insert_peer_bucket(&self, account: &str, peers: Vec<String>) -> Result<bool>;

    /// Announce a peer
    async fn register_peer(&self, peer: PeerInfo) -> Result<()>;
}

/// Append-only log of resolved global transactions
#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn create_transaction_entry(&self, entry: TransactionLogEntry) -> Result<()>;

    /// All entries in append order
    async fn entries(&self) -> Result<Vec<TransactionLogEntry>>;
}
