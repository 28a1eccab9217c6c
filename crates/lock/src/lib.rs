//! Advisory locks keyed by account number
//!
//! The coordinator serializes conflicting cross-partition work by taking an
//! exclusive lock on every account a transaction touches. Locks are owned by
//! the global transaction id, so re-acquiring a key already held by the same
//! transaction succeeds immediately.

mod error;
mod guard;
mod service;

pub use error::{LockError, Result};
pub use guard::LockGuard;
pub use service::LockService;

use async_trait::async_trait;
use mas_common::TransactionId;

/// Client capability for the lock service
#[async_trait]
pub trait LockClient: Send + Sync {
    /// Acquire `key` for `owner`. `Ok(false)` means the lock could not be
    /// obtained before the client's timeout.
    async fn acquire_lock(&self, key: &str, owner: TransactionId) -> Result<bool>;

    /// Release `key` if held by `owner`. `Ok(false)` means it was not held.
    async fn release_lock(&self, key: &str, owner: TransactionId) -> Result<bool>;
}
