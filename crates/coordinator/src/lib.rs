//! Two-phase commit coordinator
//!
//! Requests arrive at [`TxnCoordinator`], which routes each account to its
//! partition bucket and runs the work as a [`GlobalTransaction`] over one
//! [`LocalTransaction`] per account. A local transaction holds the account's
//! global lock from prepare until commit or rollback.

mod config;
mod coordinator;
mod error;
mod global;
mod local;
mod metrics;
mod reply;
mod selection;
mod transaction;

#[cfg(test)]
mod testing;

pub use config::CoordinatorConfig;
pub use coordinator::{CoordinatorContext, TxnCoordinator};
pub use error::{CoordinatorError, Result};
pub use global::GlobalTransaction;
pub use local::{LocalTimeouts, LocalTransaction};
pub use metrics::{CoordinatorMetrics, MetricsSnapshot};
pub use reply::{AccountReply, PaymentReply, Reply};
pub use selection::{PeerSelector, SelectionPolicy};
pub use transaction::{Transaction, TransactionState};
