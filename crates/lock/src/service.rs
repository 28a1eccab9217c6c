//! In-process lock service

use crate::{LockClient, LockError, Result};
use async_trait::async_trait;
use mas_common::TransactionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Exclusive, owner-keyed lock table
///
/// Waiters park on a shared [`Notify`] and re-check the table on every
/// release, so a wait costs nothing until a lock is actually freed.
#[derive(Clone)]
pub struct LockService {
    inner: Arc<Inner>,
    timeout: Duration,
}

struct Inner {
    /// key -> holder
    locks: Mutex<HashMap<String, TransactionId>>,
    released: Notify,
    closed: AtomicBool,
}

impl LockService {
    /// Create a lock service whose acquisitions wait at most `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                locks: Mutex::new(HashMap::new()),
                released: Notify::new(),
                closed: AtomicBool::new(false),
            }),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn try_grant(&self, key: &str, owner: TransactionId) -> bool {
        let mut locks = self.inner.locks.lock();
        match locks.get(key) {
            Some(holder) => *holder == owner,
            None => {
                locks.insert(key.to_string(), owner);
                true
            }
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(LockError::Unavailable("lock service closed".to_string()));
        }
        Ok(())
    }

    /// Acquire `key` for `owner`, waiting until `deadline`
    pub async fn acquire_until(
        &self,
        key: &str,
        owner: TransactionId,
        deadline: Instant,
    ) -> Result<bool> {
        if key.is_empty() {
            return Err(LockError::EmptyKey);
        }

        loop {
            self.check_open()?;

            // Register interest before checking so a release between the
            // check and the await is not missed
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_grant(key, owner) {
                tracing::debug!(key, %owner, "Lock granted");
                return Ok(true);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::debug!(key, %owner, "Lock wait timed out");
                return Ok(false);
            }
        }
    }

    /// Release `key` if `owner` holds it
    pub fn release(&self, key: &str, owner: TransactionId) -> bool {
        let released = {
            let mut locks = self.inner.locks.lock();
            if locks.get(key) == Some(&owner) {
                locks.remove(key);
                true
            } else {
                false
            }
        };

        if released {
            tracing::debug!(key, %owner, "Lock released");
            self.inner.released.notify_waiters();
        }
        released
    }

    /// Release every lock held by `owner`
    pub fn release_all(&self, owner: TransactionId) -> usize {
        let count = {
            let mut locks = self.inner.locks.lock();
            let before = locks.len();
            locks.retain(|_, holder| *holder != owner);
            before - locks.len()
        };
        if count > 0 {
            self.inner.released.notify_waiters();
        }
        count
    }

    /// Current holder of `key`
    pub fn holder(&self, key: &str) -> Option<TransactionId> {
        self.inner.locks.lock().get(key).copied()
    }

    /// Number of keys currently locked
    pub fn held_count(&self) -> usize {
        self.inner.locks.lock().len()
    }

    /// Refuse further acquisitions and wake every waiter
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.released.notify_waiters();
    }
}

#[async_trait]
impl LockClient for LockService {
    async fn acquire_lock(&self, key: &str, owner: TransactionId) -> Result<bool> {
        self.acquire_until(key, owner, Instant::now() + self.timeout)
            .await
    }

    async fn release_lock(&self, key: &str, owner: TransactionId) -> Result<bool> {
        self.check_open()?;
        Ok(self.release(key, owner))
    }
}
