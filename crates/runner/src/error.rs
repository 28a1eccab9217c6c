//! Error types for the runner

use thiserror::Error;

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Runner errors
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Engine error: {0}")]
    Engine(#[from] mas_engine::MockEngineError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] mas_snapshot::SnapshotError),

    #[error("Applier error: {0}")]
    Applier(#[from] mas_resource::ApplierError),

    #[error("Metadata error: {0}")]
    Meta(#[from] mas_meta::MetaError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] mas_coordinator::CoordinatorError),

    #[error("Unknown partition: {0}")]
    UnknownPartition(String),

    #[error("Unknown replica: {0}")]
    UnknownReplica(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
