//! Remote inventory and migration API
//!
//! The balancer core talks to the platform through the [`ManagerApi`]
//! trait; [`client::VmManagerClient`] is the HTTP implementation and
//! tests substitute their own.

pub mod client;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;

use crate::inventory::{ClusterInfo, NodeInfo, VmInfo};
use crate::Result;

pub use client::VmManagerClient;

/// Terminal result of waiting on a migration job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed(String),
    TimedOut,
    /// Operator shutdown arrived while the job was still running. The
    /// remote job keeps going; the balancer just stops watching it.
    Interrupted,
}

/// Typed view over the remote inventory and migration endpoints.
///
/// The client never retries on its own (apart from the transparent
/// re-authentication on a rejected session token); retry policy belongs
/// to the orchestrator.
#[async_trait]
pub trait ManagerApi: Send + Sync {
    /// Establish a session token used by all subsequent calls.
    async fn authenticate(&self) -> Result<()>;

    /// Lightweight reachability probe run at cycle start. Failures are
    /// logged by the implementation; the caller only needs the verdict.
    async fn check_reachable(&self) -> bool;

    /// List all clusters, each enriched with its node inventory. A
    /// cluster whose node listing fails is skipped, not fatal.
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>>;

    /// Full node inventory filtered to one cluster. Filtering happens
    /// client-side; the server-side filter is known to 500.
    async fn list_nodes(&self, cluster_id: &str) -> Result<Vec<NodeInfo>>;

    /// VM inventory filtered to one cluster, with `can_migrate`
    /// populated from the raw payload.
    async fn list_vms(&self, cluster_id: &str) -> Result<Vec<VmInfo>>;

    /// Start an asynchronous migration. Returns the tracking job id, or
    /// `None` when the API accepted the request without one.
    async fn submit_migration(&self, vm_id: &str, target_node_id: &str)
        -> Result<Option<String>>;

    /// Block until the job reaches a terminal status, the timeout
    /// elapses, or shutdown is requested. Polls every 5 seconds and logs
    /// progress once a minute.
    async fn poll_job(&self, job_id: &str, timeout: Duration) -> Result<JobOutcome>;
}
