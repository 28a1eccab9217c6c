//! Cluster layout configuration

use crate::error::{Result, RunnerError};
use mas_resource::ApplierConfig;
use std::path::PathBuf;

/// Shape of the in-process cluster
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of partitions (replication groups)
    pub partitions: usize,
    /// Replicas started per partition
    pub replicas_per_partition: usize,
    /// Directory for on-disk snapshots; in-memory when unset
    pub snapshot_dir: Option<PathBuf>,
    pub applier: ApplierConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            partitions: 2,
            replicas_per_partition: 1,
            snapshot_dir: None,
            applier: ApplierConfig::default(),
        }
    }
}

impl ClusterConfig {
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas_per_partition = replicas;
        self
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    pub fn with_applier(mut self, applier: ApplierConfig) -> Self {
        self.applier = applier;
        self
    }

    /// Load from `MAS_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let partitions = parse_usize(lookup("MAS_PARTITIONS"), defaults.partitions)?;
        let replicas_per_partition =
            parse_usize(lookup("MAS_REPLICAS"), defaults.replicas_per_partition)?;
        let snapshot_interval = parse_usize(
            lookup("MAS_SNAPSHOT_INTERVAL"),
            defaults.applier.snapshot_interval as usize,
        )?;
        let snapshot_dir = lookup("MAS_SNAPSHOT_DIR")
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let config = Self {
            partitions,
            replicas_per_partition,
            snapshot_dir,
            applier: defaults
                .applier
                .with_snapshot_interval(snapshot_interval as u64),
        };
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.partitions == 0 {
            return Err(RunnerError::Config(
                "at least one partition is required".to_string(),
            ));
        }
        if self.replicas_per_partition == 0 {
            return Err(RunnerError::Config(
                "at least one replica per partition is required".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|e| RunnerError::Config(format!("invalid usize value {raw}: {e}"))),
        None => Ok(default_value),
    }
}
