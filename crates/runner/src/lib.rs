//! In-process cluster runtime: partitions, replicas and the coordinator

mod config;
mod error;
mod runner;

pub use config::ClusterConfig;
pub use error::{Result, RunnerError};
pub use runner::Runner;
