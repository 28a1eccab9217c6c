//! Coordinator configuration

use crate::error::{CoordinatorError, Result};
use crate::selection::SelectionPolicy;
use std::time::Duration;

/// Coordinator tuning
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Peers assigned to each new account's bucket
    pub replication_factor: usize,
    /// Longest wait for an account lock
    pub lock_timeout: Duration,
    /// Deadline for prepare, rollback and query calls
    pub rpc_timeout: Duration,
    /// Deadline for commit calls, which wait for replication
    pub commit_timeout: Duration,
    /// How partitions are chosen for new accounts
    pub selection: SelectionPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            replication_factor: 1,
            lock_timeout: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(2),
            commit_timeout: Duration::from_secs(5),
            selection: SelectionPolicy::Random,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_replication_factor(mut self, factor: usize) -> Self {
        self.replication_factor = factor;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    /// Load from `MAS_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let replication_factor = parse_usize(
            lookup("MAS_REPLICATION_FACTOR"),
            defaults.replication_factor,
        )?;
        if replication_factor == 0 {
            return Err(CoordinatorError::Config(
                "MAS_REPLICATION_FACTOR must be at least 1".to_string(),
            ));
        }

        let lock_timeout = parse_millis(lookup("MAS_LOCK_TIMEOUT_MS"), defaults.lock_timeout)?;
        let rpc_timeout = parse_millis(lookup("MAS_RPC_TIMEOUT_MS"), defaults.rpc_timeout)?;
        let commit_timeout =
            parse_millis(lookup("MAS_COMMIT_TIMEOUT_MS"), defaults.commit_timeout)?;

        Ok(Self {
            replication_factor,
            lock_timeout,
            rpc_timeout,
            commit_timeout,
            selection: defaults.selection,
        })
    }
}

fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|e| CoordinatorError::Config(format!("invalid usize value {raw}: {e}"))),
        None => Ok(default_value),
    }
}

fn parse_millis(value: Option<String>, default_value: Duration) -> Result<Duration> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| CoordinatorError::Config(format!("invalid millisecond value {raw}: {e}"))),
        None => Ok(default_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = CoordinatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.replication_factor, 1);
        assert_eq!(config.commit_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = CoordinatorConfig::from_lookup(lookup(&[
            ("MAS_REPLICATION_FACTOR", "3"),
            ("MAS_LOCK_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.replication_factor, 3);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(CoordinatorConfig::from_lookup(lookup(&[("MAS_RPC_TIMEOUT_MS", "soon")])).is_err());
        assert!(
            CoordinatorConfig::from_lookup(lookup(&[("MAS_REPLICATION_FACTOR", "0")])).is_err()
        );
    }
}
