//! Balancer configuration
//!
//! Immutable per-run parameters. Every CLI flag has an environment
//! fallback; env values follow the `.env` conventions of the deployment
//! tooling: inline `#` comments are stripped and comma lists are
//! trimmed.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::balancer::VmSelection;
use crate::{Error, Result};

pub const DEFAULT_CPU_OVERLOAD_THRESHOLD: f64 = 7.0;
pub const DEFAULT_MEMORY_OVERLOAD_THRESHOLD: f64 = 70.0;
pub const DEFAULT_CPU_TARGET_THRESHOLD: f64 = 6.0;
pub const DEFAULT_MEMORY_TARGET_THRESHOLD: f64 = 80.0;
pub const DEFAULT_MAX_MIGRATIONS_PER_CYCLE: usize = 1;
pub const DEFAULT_MIGRATION_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_BALANCE_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_RETENTION_SECS: u64 = 3600;

/// Immutable parameters of one balancer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// A node with a higher vCPU allocation ratio is a source candidate.
    pub cpu_overload_threshold: f64,
    /// A node with higher memory usage (percent) is a source candidate.
    pub memory_overload_threshold: f64,
    /// A node is target-eligible only below this allocation ratio.
    pub cpu_target_threshold: f64,
    /// A node is target-eligible only below this memory percentage.
    pub memory_target_threshold: f64,
    /// Cap on migrations per cluster per cycle.
    pub max_migrations_per_cycle: usize,
    /// Upper bound on waiting for one migration job.
    pub migration_timeout: Duration,
    /// Sleep between balance cycles.
    pub balance_interval: Duration,
    /// Cool-down after a successful migration.
    pub history_retention: Duration,
    /// Cool-down after a failed migration.
    pub blacklist_retention: Duration,
    /// If non-empty, only these clusters are processed.
    pub cluster_ids: Vec<String>,
    /// Nodes (by name or id) never used as migration sources.
    pub exclude_source_nodes: HashSet<String>,
    /// Nodes (by name or id) never used as migration targets.
    pub exclude_target_nodes: HashSet<String>,
    /// Candidate ordering for VM selection.
    pub vm_selection: VmSelection,
    /// Decide and project, but never submit.
    pub dry_run: bool,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            cpu_overload_threshold: DEFAULT_CPU_OVERLOAD_THRESHOLD,
            memory_overload_threshold: DEFAULT_MEMORY_OVERLOAD_THRESHOLD,
            cpu_target_threshold: DEFAULT_CPU_TARGET_THRESHOLD,
            memory_target_threshold: DEFAULT_MEMORY_TARGET_THRESHOLD,
            max_migrations_per_cycle: DEFAULT_MAX_MIGRATIONS_PER_CYCLE,
            migration_timeout: Duration::from_secs(DEFAULT_MIGRATION_TIMEOUT_SECS),
            balance_interval: Duration::from_secs(DEFAULT_BALANCE_INTERVAL_SECS),
            history_retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            blacklist_retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            cluster_ids: Vec::new(),
            exclude_source_nodes: HashSet::new(),
            exclude_target_nodes: HashSet::new(),
            vm_selection: VmSelection::default(),
            dry_run: false,
        }
    }
}

impl BalancerConfig {
    /// A target threshold above its overload threshold makes the loop
    /// oscillate: nodes would be refilled past the point that makes them
    /// sources again.
    pub fn validate(&self) -> Result<()> {
        if self.cpu_target_threshold > self.cpu_overload_threshold {
            return Err(Error::Config(format!(
                "cpu_target_threshold ({}) must not exceed cpu_overload_threshold ({})",
                self.cpu_target_threshold, self.cpu_overload_threshold
            )));
        }
        if self.memory_target_threshold > self.memory_overload_threshold {
            return Err(Error::Config(format!(
                "memory_target_threshold ({}) must not exceed memory_overload_threshold ({})",
                self.memory_target_threshold, self.memory_overload_threshold
            )));
        }
        if self.max_migrations_per_cycle == 0 {
            return Err(Error::Config(
                "max_migrations_per_cycle must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Environment variable value with any inline `#` comment stripped.
pub fn env_value(key: &str, default: &str) -> String {
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    strip_comment(&value)
}

/// Environment variable parsed into `T`, falling back to the default on
/// absence or parse failure.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => strip_comment(&value).parse().unwrap_or(default),
        Err(_) => default,
    }
}

/// Comma-separated environment list with whitespace trimmed and empty
/// items dropped.
pub fn env_list(key: &str) -> Vec<String> {
    let value = env_value(key, "");
    split_list(&value)
}

pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_comment(value: &str) -> String {
    match value.split_once('#') {
        Some((before, _)) => before.trim().to_string(),
        None => value.trim().to_string(),
    }
}
