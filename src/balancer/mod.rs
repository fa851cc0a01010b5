//! Balancing control loop
//!
//! One cycle per interval: fetch the inventory, classify nodes, pick
//! VMs, check placements, execute migrations, record the outcome. No
//! error below the configuration/authentication level ever stops the
//! outer loop.

pub mod analyzer;
pub mod estimator;
pub mod executor;
pub mod ledger;
pub mod strategy;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::ManagerApi;
use crate::config::BalancerConfig;
use crate::inventory::{ClusterInfo, NodeInfo, VmInfo};
use crate::shutdown::ShutdownSignal;

pub use analyzer::NodeAnalyzer;
pub use estimator::ResourceEstimator;
pub use executor::{MigrationExecutor, MigrationOutcome, RealExecutor, SimulatingExecutor};
pub use ledger::MigrationLedger;
pub use strategy::{MigrationStrategy, VmSelection};

/// Immutable snapshot of balancer progress, published after every cycle
/// for concurrent readers (status displays, health endpoints).
#[derive(Debug, Clone, Default, Serialize)]
pub struct BalancerStatus {
    pub cycles_completed: u64,
    pub total_migrations: u64,
    pub last_cycle_migrations: usize,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub history_entries: usize,
    pub blacklist_entries: usize,
    pub dry_run: bool,
}

pub struct VmBalancer {
    api: Arc<dyn ManagerApi>,
    executor: Arc<dyn MigrationExecutor>,
    config: BalancerConfig,
    analyzer: NodeAnalyzer,
    estimator: ResourceEstimator,
    strategy: MigrationStrategy,
    ledger: MigrationLedger,
    shutdown: ShutdownSignal,
    status_tx: watch::Sender<BalancerStatus>,
    cycles_completed: u64,
    total_migrations: u64,
}

impl VmBalancer {
    pub fn new(
        api: Arc<dyn ManagerApi>,
        executor: Arc<dyn MigrationExecutor>,
        config: BalancerConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        let analyzer = NodeAnalyzer::new(&config);
        let estimator = ResourceEstimator::new(
            config.cpu_overload_threshold,
            config.memory_overload_threshold,
        );
        let strategy = MigrationStrategy::new(config.vm_selection);
        let ledger = MigrationLedger::new(config.history_retention, config.blacklist_retention);
        let (status_tx, _) = watch::channel(BalancerStatus {
            dry_run: config.dry_run,
            ..Default::default()
        });

        Self {
            api,
            executor,
            config,
            analyzer,
            estimator,
            strategy,
            ledger,
            shutdown,
            status_tx,
            cycles_completed: 0,
            total_migrations: 0,
        }
    }

    /// Watch the published status snapshots.
    pub fn subscribe_status(&self) -> watch::Receiver<BalancerStatus> {
        self.status_tx.subscribe()
    }

    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut MigrationLedger {
        &mut self.ledger
    }

    /// Run cycles at the configured interval until a stop is requested.
    pub async fn run(&mut self) {
        loop {
            self.run_cycle().await;

            if !self.shutdown.sleep(self.config.balance_interval).await {
                break;
            }
        }

        info!("Balancer stopped");
    }

    /// One complete balance pass over all selected clusters. Returns the
    /// number of migrations performed (or simulated).
    pub async fn run_cycle(&mut self) -> usize {
        let mode = if self.config.dry_run { "[DRY RUN] " } else { "" };
        info!("{}Starting balance cycle", mode);

        if !self.api.check_reachable().await {
            error!("VMManager API is not accessible");
            return 0;
        }

        let clusters = match self.api.list_clusters().await {
            Ok(clusters) => clusters,
            Err(e) => {
                error!("Failed to get clusters: {}", e);
                return 0;
            }
        };
        if clusters.is_empty() {
            warn!("No clusters found");
            return 0;
        }

        let clusters = self.filter_clusters(clusters);
        if clusters.is_empty() {
            warn!("No clusters to process after filtering");
            return 0;
        }

        let mut total_migrations = 0;
        for cluster in &clusters {
            if self.shutdown.is_requested() {
                break;
            }
            total_migrations += self.balance_cluster(cluster).await;
        }

        self.ledger.evict_expired();
        self.cycles_completed += 1;
        self.total_migrations += total_migrations as u64;
        self.publish_status(total_migrations);

        info!(
            "{}Balance cycle completed. Total migrations: {}",
            mode, total_migrations
        );
        total_migrations
    }

    fn filter_clusters(&self, clusters: Vec<ClusterInfo>) -> Vec<ClusterInfo> {
        if self.config.cluster_ids.is_empty() {
            return clusters;
        }

        let filtered: Vec<ClusterInfo> = clusters
            .into_iter()
            .filter(|cluster| self.config.cluster_ids.contains(&cluster.id))
            .collect();

        if filtered.is_empty() {
            warn!(
                "No clusters found matching specified IDs: {:?}",
                self.config.cluster_ids
            );
        } else {
            let names: Vec<String> = filtered
                .iter()
                .map(|c| format!("{} (ID: {})", c.name, c.id))
                .collect();
            info!("Processing specific clusters: {}", names.join(", "));
        }

        filtered
    }

    /// Balance one cluster; returns the number of migrations performed.
    async fn balance_cluster(&mut self, cluster: &ClusterInfo) -> usize {
        info!("Starting balance check for cluster: {}", cluster.name);
        self.log_cluster_settings(cluster);

        let mut sources = self.analyzer.find_overloaded(&cluster.nodes);
        let mut targets = self.analyzer.find_underloaded(&cluster.nodes);

        if sources.is_empty() {
            info!("No overloaded nodes found in cluster {}", cluster.name);
            return 0;
        }
        if targets.is_empty() {
            warn!("No available target nodes in cluster {}", cluster.name);
            return 0;
        }

        let vms = match self.api.list_vms(&cluster.id).await {
            Ok(vms) => vms,
            Err(e) => {
                error!("Failed to get VMs for cluster {}: {}", cluster.name, e);
                return 0;
            }
        };

        let mut performed = 0;
        let mut migrated_ids: HashSet<String> = HashSet::new();

        for src_idx in 0..sources.len() {
            if performed >= self.config.max_migrations_per_cycle {
                break;
            }
            if self.shutdown.is_requested() {
                break;
            }

            info!(
                "Node {} is overloaded: CPU allocation {:.1}:1 ({}/{}), Memory {:.1}%",
                sources[src_idx].name,
                sources[src_idx].cpu_allocation_ratio(),
                sources[src_idx].cpu_used,
                sources[src_idx].cpu_total,
                sources[src_idx].memory_usage_percent()
            );

            let vm = match self
                .strategy
                .select_candidate(&vms, &sources[src_idx], &self.ledger)
            {
                Some(vm) => vm,
                None => {
                    info!(
                        "No suitable VM found for migration from {}",
                        sources[src_idx].name
                    );
                    continue;
                }
            };

            // can_accept_vms is re-checked on the projected snapshot so a
            // target filled to its VM limit earlier in the cycle drops out
            let tgt_idx = match targets.iter().position(|target| {
                target.id != sources[src_idx].id
                    && target.can_accept_vms()
                    && self.estimator.can_accept(target, &vm, &sources[src_idx])
            }) {
                Some(idx) => idx,
                None => {
                    info!("No suitable target node found for VM {}", vm.name);
                    continue;
                }
            };

            let outcome = self
                .executor
                .execute(&vm, &sources[src_idx], &targets[tgt_idx])
                .await;

            match outcome {
                MigrationOutcome::Simulated => {
                    info!("[DRY RUN] VM {} migration simulated successfully", vm.name);
                    performed += 1;
                    migrated_ids.insert(vm.id.clone());
                    apply_projection(&mut sources[src_idx], &mut targets[tgt_idx], &vm);
                }
                MigrationOutcome::Completed => {
                    info!("Successfully migrated VM {}", vm.name);
                    self.ledger.record_success(&vm.id);
                    performed += 1;
                    migrated_ids.insert(vm.id.clone());
                    apply_projection(&mut sources[src_idx], &mut targets[tgt_idx], &vm);
                    self.retire_target_if_full(cluster, &mut targets, tgt_idx, &vms, &migrated_ids);
                }
                MigrationOutcome::Failed(reason) => {
                    error!("Failed to migrate VM {}: {}", vm.name, reason);
                    self.ledger.record_failure(&vm.id);
                }
                MigrationOutcome::TimedOut => {
                    warn!("Migration of VM {} timed out", vm.name);
                    self.ledger.record_failure(&vm.id);
                }
                MigrationOutcome::Interrupted => {
                    warn!("Migration of VM {} interrupted by shutdown", vm.name);
                    return performed;
                }
            }
        }

        performed
    }

    fn log_cluster_settings(&self, cluster: &ClusterInfo) {
        debug!(
            "Thresholds - CPU overload: {}:1, Memory overload: {}%, CPU target: {}:1, \
             Memory target: {}%",
            self.config.cpu_overload_threshold,
            self.config.memory_overload_threshold,
            self.config.cpu_target_threshold,
            self.config.memory_target_threshold
        );
        debug!(
            "Migration settings - Max migrations per cycle: {}",
            self.config.max_migrations_per_cycle
        );

        if !self.config.exclude_source_nodes.is_empty() {
            let mut excluded: Vec<&str> = self
                .config
                .exclude_source_nodes
                .iter()
                .map(String::as_str)
                .collect();
            excluded.sort_unstable();
            info!("Excluded migration sources: {}", excluded.join(", "));
        }
        if !self.config.exclude_target_nodes.is_empty() {
            let mut excluded: Vec<&str> = self
                .config
                .exclude_target_nodes
                .iter()
                .map(String::as_str)
                .collect();
            excluded.sort_unstable();
            info!("Excluded migration targets: {}", excluded.join(", "));
        }

        let restricted: Vec<&str> = cluster
            .nodes
            .iter()
            .filter(|node| !node.vm_creation_allowed)
            .map(|node| node.name.as_str())
            .collect();
        if !restricted.is_empty() {
            info!("Nodes with VM creation disabled: {}", restricted.join(", "));
        }
    }

    /// Drop a target from the cycle once no remaining migratable VM
    /// would fit on it.
    fn retire_target_if_full(
        &self,
        cluster: &ClusterInfo,
        targets: &mut Vec<NodeInfo>,
        tgt_idx: usize,
        vms: &[VmInfo],
        migrated_ids: &HashSet<String>,
    ) {
        let target = &targets[tgt_idx];
        let still_viable = target.can_accept_vms()
            && vms.iter().any(|vm| {
                vm.can_migrate
                    && !migrated_ids.contains(&vm.id)
                    && vm.node_id != target.id
                    && cluster
                        .node_by_id(&vm.node_id)
                        .map(|source| self.estimator.can_accept(target, vm, source))
                        .unwrap_or(false)
            });

        if !still_viable {
            debug!(
                "Target {} can no longer accept any remaining candidate, retiring it for this cycle",
                target.name
            );
            targets.remove(tgt_idx);
        }
    }

    fn publish_status(&self, last_cycle_migrations: usize) {
        self.status_tx.send_replace(BalancerStatus {
            cycles_completed: self.cycles_completed,
            total_migrations: self.total_migrations,
            last_cycle_migrations,
            last_cycle_at: Some(Utc::now()),
            history_entries: self.ledger.history_len(),
            blacklist_entries: self.ledger.blacklist_len(),
            dry_run: self.config.dry_run,
        });
    }
}

/// Mutate the in-memory snapshots after a real or simulated migration so
/// later decisions in the same cycle see consistent state.
fn apply_projection(source: &mut NodeInfo, target: &mut NodeInfo, vm: &VmInfo) {
    source.vm_count = source.vm_count.saturating_sub(1);
    source.cpu_used = source.cpu_used.saturating_sub(vm.cpu_cores);
    source.memory_used_mb = source.memory_used_mb.saturating_sub(vm.memory_mb);
    target.vm_count += 1;
    target.cpu_used += vm.cpu_cores;
    target.memory_used_mb += vm.memory_mb;
}
