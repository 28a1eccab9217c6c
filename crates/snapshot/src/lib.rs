//! Snapshot storage trait and types for replicated partitions

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Snapshot store errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(String),

    #[error("Snapshot for {group} is corrupt: {reason}")]
    Corrupt { group: String, reason: String },

    #[error("Snapshot metadata encoding error: {0}")]
    Encoding(String),
}

/// Metadata about a stored snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Replication group this snapshot belongs to
    pub group: String,
    /// Last log index covered by the snapshot
    pub index: u64,
    /// Size of snapshot data in bytes
    pub size_bytes: u64,
    /// SHA256 checksum of snapshot data
    pub checksum: [u8; 32],
    /// System time when snapshot was created (ms since epoch)
    pub created_at: i64,
}

/// Snapshot payload with its metadata
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub data: Vec<u8>,
}

impl Snapshot {
    /// Build a snapshot, computing size and checksum
    pub fn new(group: &str, index: u64, data: Vec<u8>) -> Self {
        Self {
            metadata: SnapshotMetadata {
                group: group.to_string(),
                index,
                size_bytes: data.len() as u64,
                checksum: checksum(&data),
                created_at: chrono::Utc::now().timestamp_millis(),
            },
            data,
        }
    }

    /// Check the payload against the recorded size and checksum
    pub fn verify(&self) -> Result<()> {
        if self.data.len() as u64 != self.metadata.size_bytes {
            return Err(SnapshotError::Corrupt {
                group: self.metadata.group.clone(),
                reason: format!(
                    "expected {} bytes, found {}",
                    self.metadata.size_bytes,
                    self.data.len()
                ),
            });
        }
        if checksum(&self.data) != self.metadata.checksum {
            return Err(SnapshotError::Corrupt {
                group: self.metadata.group.clone(),
                reason: "checksum mismatch".to_string(),
            });
        }
        Ok(())
    }
}

/// SHA256 over snapshot data
pub fn checksum(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Trait for snapshot storage backends
pub trait SnapshotStore: Send + Sync {
    /// Save a snapshot covering the log up to `index`, replacing any older one
    fn save(&self, group: &str, index: u64, data: Vec<u8>) -> Result<SnapshotMetadata>;

    /// Load the latest snapshot for a group; `Ok(None)` when none exists
    fn load(&self, group: &str) -> Result<Option<Snapshot>>;
}
