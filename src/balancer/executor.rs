//! Migration execution seam
//!
//! Every side effect of a migration attempt (submit, poll) goes through
//! [`MigrationExecutor`], so the orchestrator is execution-agnostic:
//! [`RealExecutor`] drives the remote job API, [`SimulatingExecutor`]
//! backs dry-run mode.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use crate::api::{JobOutcome, ManagerApi};
use crate::inventory::{NodeInfo, VmInfo};

/// What became of one migration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The remote job finished successfully.
    Completed,
    /// Dry-run: nothing was submitted, the move is only projected.
    Simulated,
    /// Submission was rejected or the job reported an error.
    Failed(String),
    /// The job outlived the configured timeout.
    TimedOut,
    /// Operator shutdown arrived while the job was in flight.
    Interrupted,
}

#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    async fn execute(&self, vm: &VmInfo, source: &NodeInfo, target: &NodeInfo)
        -> MigrationOutcome;
}

/// Submits the migration and blocks on the job until a terminal status.
pub struct RealExecutor {
    api: Arc<dyn ManagerApi>,
    timeout: Duration,
}

impl RealExecutor {
    pub fn new(api: Arc<dyn ManagerApi>, timeout: Duration) -> Self {
        Self { api, timeout }
    }
}

#[async_trait]
impl MigrationExecutor for RealExecutor {
    async fn execute(
        &self,
        vm: &VmInfo,
        source: &NodeInfo,
        target: &NodeInfo,
    ) -> MigrationOutcome {
        info!(
            "Migrating VM {} from {} to {}",
            vm.name, source.name, target.name
        );

        let job_id = match self.api.submit_migration(&vm.id, &target.id).await {
            Ok(Some(job_id)) => job_id,
            // No tracking job means the API completed the move inline
            Ok(None) => return MigrationOutcome::Completed,
            Err(e) => {
                error!("Failed to submit migration for VM {}: {}", vm.name, e);
                return MigrationOutcome::Failed(e.to_string());
            }
        };

        match self.api.poll_job(&job_id, self.timeout).await {
            Ok(JobOutcome::Success) => MigrationOutcome::Completed,
            Ok(JobOutcome::Failed(message)) => MigrationOutcome::Failed(message),
            Ok(JobOutcome::TimedOut) => MigrationOutcome::TimedOut,
            Ok(JobOutcome::Interrupted) => MigrationOutcome::Interrupted,
            Err(e) => {
                error!("Error waiting for job {}: {}", job_id, e);
                MigrationOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Logs the decision and reports it as simulated; no remote call is
/// ever made.
pub struct SimulatingExecutor;

#[async_trait]
impl MigrationExecutor for SimulatingExecutor {
    async fn execute(
        &self,
        vm: &VmInfo,
        source: &NodeInfo,
        target: &NodeInfo,
    ) -> MigrationOutcome {
        info!(
            "[DRY RUN] Would migrate VM {} from {} to {}",
            vm.name, source.name, target.name
        );
        MigrationOutcome::Simulated
    }
}
