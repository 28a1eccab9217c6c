//! Filesystem-based snapshot storage implementation
//!
//! Each group keeps one `<group>.snap` payload and one `<group>.meta` JSON
//! file. Both are written to a temporary name first and renamed into place,
//! metadata last, so a crash never exposes a payload without matching
//! metadata.

use mas_snapshot::{Result, Snapshot, SnapshotError, SnapshotMetadata, SnapshotStore};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

/// Filesystem-based snapshot store
pub struct FileSnapshotStore {
    /// Base directory for storing snapshots
    base_path: PathBuf,
    /// Serializes writers within this process
    write_lock: Mutex<()>,
}

impl FileSnapshotStore {
    /// Create a new file-based snapshot store
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();

        fs::create_dir_all(&base_path).map_err(|e| {
            SnapshotError::Io(format!("Failed to create snapshot directory: {}", e))
        })?;

        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    fn data_file(&self, group: &str) -> PathBuf {
        self.base_path.join(format!("{}.snap", group))
    }

    fn meta_file(&self, group: &str) -> PathBuf {
        self.base_path.join(format!("{}.meta", group))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)
            .map_err(|e| SnapshotError::Io(format!("Failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, path)
            .map_err(|e| SnapshotError::Io(format!("Failed to rename {}: {}", tmp.display(), e)))
    }

    fn read_metadata(&self, group: &str) -> Result<Option<SnapshotMetadata>> {
        let path = self.meta_file(group);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .map_err(|e| SnapshotError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SnapshotError::Encoding(e.to_string()))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, group: &str, index: u64, data: Vec<u8>) -> Result<SnapshotMetadata> {
        let _guard = self.write_lock.lock();

        if let Some(existing) = self.read_metadata(group)?
            && existing.index > index
        {
            tracing::debug!(group, index, existing = existing.index, "Skipping older snapshot");
            return Ok(existing);
        }

        let snapshot = Snapshot::new(group, index, data);
        let meta_bytes = serde_json::to_vec_pretty(&snapshot.metadata)
            .map_err(|e| SnapshotError::Encoding(e.to_string()))?;

        Self::write_atomic(&self.data_file(group), &snapshot.data)?;
        Self::write_atomic(&self.meta_file(group), &meta_bytes)?;

        tracing::debug!(group, index, size = snapshot.metadata.size_bytes, "Snapshot saved");
        Ok(snapshot.metadata)
    }

    fn load(&self, group: &str) -> Result<Option<Snapshot>> {
        let Some(metadata) = self.read_metadata(group)? else {
            return Ok(None);
        };

        let path = self.data_file(group);
        let data = fs::read(&path)
            .map_err(|e| SnapshotError::Io(format!("Failed to read {}: {}", path.display(), e)))?;

        let snapshot = Snapshot { metadata, data };
        snapshot.verify()?;
        Ok(Some(snapshot))
    }
}
