//! In-memory mock engine for replicated partitions
//!
//! This crate provides an in-process stand-in for the consensus and transport
//! layers: named replication groups that totally order proposals and deliver
//! them to every member, plus subject-addressed request/reply.

use thiserror::Error;

pub mod client;
pub mod engine;
pub mod group;
pub mod message;

pub use client::MockClient;
pub use engine::MockEngine;
pub use group::{CommitEntry, GroupHandle, ReplicationError};
pub use message::Message;

/// Mock engine errors
#[derive(Debug, Error)]
pub enum MockEngineError {
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Group already exists: {0}")]
    GroupExists(String),

    #[error("Group failed: {0}")]
    GroupFailed(String),

    #[error("No subscribers for subject: {0}")]
    NoSubscribers(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, MockEngineError>;
