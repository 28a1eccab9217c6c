//! Resource-manager partition
//!
//! Each partition replica owns a shard of accounts. This crate provides:
//! - [`AccountStore`]: account and payment state
//! - [`ReservationManager`]: prepare-time reservations
//! - [`Applier`]: the replicated state machine fed by the partition's log
//! - [`RmService`]: the prepare/commit/rollback/query RPC surface

pub mod applier;
mod error;
pub mod messages;
pub mod service;
pub mod storage;

pub use applier::{Applier, ApplierConfig, ApplierPhase, ApplyOutcome};
pub use error::{ApplierError, ResourceError, Result};
pub use messages::{RmRequest, RmResponse};
pub use service::RmService;
pub use storage::{AccountStore, ReservationManager};
