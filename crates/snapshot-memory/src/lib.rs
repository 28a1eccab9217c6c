//! In-memory snapshot storage implementation

use mas_snapshot::{Result, Snapshot, SnapshotMetadata, SnapshotStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory snapshot store for testing and single-process clusters
#[derive(Clone, Default)]
pub struct MemorySnapshotStore {
    // group -> latest snapshot
    snapshots: Arc<RwLock<HashMap<String, Snapshot>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, group: &str, index: u64, data: Vec<u8>) -> Result<SnapshotMetadata> {
        let snapshot = Snapshot::new(group, index, data);
        let metadata = snapshot.metadata.clone();

        let mut snapshots = self.snapshots.write();
        // Never move backwards
        if snapshots
            .get(group)
            .is_none_or(|existing| existing.metadata.index <= index)
        {
            snapshots.insert(group.to_string(), snapshot);
        }
        Ok(metadata)
    }

    fn load(&self, group: &str) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().get(group).cloned())
    }
}
