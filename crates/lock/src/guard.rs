//! Scoped lock ownership

use crate::{LockClient, Result};
use mas_common::TransactionId;
use std::sync::Arc;

/// A held lock that is released on every exit path
///
/// Call [`LockGuard::release`] to release and observe the result. A guard
/// dropped without an explicit release hands the release to a background
/// task on the current runtime.
pub struct LockGuard {
    client: Arc<dyn LockClient>,
    key: String,
    owner: TransactionId,
    released: bool,
}

impl LockGuard {
    /// Acquire `key` for `owner`; `Ok(None)` when the lock is unavailable
    pub async fn acquire(
        client: Arc<dyn LockClient>,
        key: impl Into<String>,
        owner: TransactionId,
    ) -> Result<Option<Self>> {
        let key = key.into();
        if !client.acquire_lock(&key, owner).await? {
            return Ok(None);
        }
        Ok(Some(Self {
            client,
            key,
            owner,
            released: false,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> TransactionId {
        self.owner
    }

    /// Release the lock now
    pub async fn release(mut self) -> bool {
        self.released = true;
        match self.client.release_lock(&self.key, self.owner).await {
            Ok(released) => released,
            Err(e) => {
                tracing::warn!(key = %self.key, owner = %self.owner, error = %e, "Lock release failed");
                false
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let client = self.client.clone();
        let key = std::mem::take(&mut self.key);
        let owner = self.owner;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.release_lock(&key, owner).await {
                        tracing::warn!(%key, %owner, error = %e, "Deferred lock release failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(%key, %owner, "Lock guard dropped outside a runtime; lock leaked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LockService;
    use std::time::Duration;

    #[tokio::test]
    async fn test_explicit_release() {
        let service = LockService::new(Duration::from_millis(20));
        let client: Arc<dyn LockClient> = Arc::new(service.clone());
        let owner = TransactionId::new();

        let guard = LockGuard::acquire(client.clone(), "A1", owner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.holder("A1"), Some(owner));

        // Contended acquisition yields no guard
        let other = LockGuard::acquire(client, "A1", TransactionId::new())
            .await
            .unwrap();
        assert!(other.is_none());

        assert!(guard.release().await);
        assert_eq!(service.holder("A1"), None);
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let service = LockService::new(Duration::from_secs(1));
        let client: Arc<dyn LockClient> = Arc::new(service.clone());
        let owner = TransactionId::new();

        {
            let _guard = LockGuard::acquire(client.clone(), "A1", owner)
                .await
                .unwrap()
                .unwrap();
        }

        // The deferred release frees the key for the next owner
        let next = LockGuard::acquire(client, "A1", TransactionId::new())
            .await
            .unwrap();
        assert!(next.is_some());
    }
}
