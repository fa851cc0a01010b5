//! VM candidate selection for a migration source
//!
//! From the VMs hosted on an overloaded node, drop everything that
//! cannot or should not move (non-migratable, recently migrated,
//! blacklisted) and pick one by the configured size ordering.

use std::collections::HashMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ledger::MigrationLedger;
use crate::inventory::{NodeInfo, VmInfo};

/// Candidate ordering. Smallest first maximizes the chance of finding a
/// target and minimizes wasted transfer time when a migration fails;
/// largest first evacuates an overloaded node fastest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum VmSelection {
    #[default]
    SmallestFirst,
    LargestFirst,
}

impl std::str::FromStr for VmSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "smallest-first" | "smallest_first" | "smallest" => Ok(VmSelection::SmallestFirst),
            "largest-first" | "largest_first" | "largest" => Ok(VmSelection::LargestFirst),
            other => Err(format!("unknown VM selection order '{}'", other)),
        }
    }
}

pub struct MigrationStrategy {
    selection: VmSelection,
}

impl MigrationStrategy {
    pub fn new(selection: VmSelection) -> Self {
        Self { selection }
    }

    /// Pick one VM to migrate off the source node, or `None` when no
    /// candidate survives the filters.
    pub fn select_candidate(
        &self,
        vms: &[VmInfo],
        source: &NodeInfo,
        ledger: &MigrationLedger,
    ) -> Option<VmInfo> {
        let on_node: Vec<&VmInfo> = vms.iter().filter(|vm| vm.node_id == source.id).collect();
        let migratable: Vec<&VmInfo> = on_node.iter().copied().filter(|vm| vm.can_migrate).collect();

        debug!(
            "Node {}: {} total VMs, {} can migrate",
            source.name,
            on_node.len(),
            migratable.len()
        );

        if migratable.is_empty() {
            self.log_no_candidates(&on_node, source);
            return None;
        }

        let not_recent: Vec<&VmInfo> = migratable
            .iter()
            .copied()
            .filter(|vm| !ledger.recently_succeeded(&vm.id))
            .collect();
        if not_recent.is_empty() {
            info!(
                "Node {}: {} VMs can migrate, but all were recently migrated",
                source.name,
                migratable.len()
            );
            return None;
        }

        let mut candidates: Vec<&VmInfo> = not_recent
            .iter()
            .copied()
            .filter(|vm| !ledger.recently_failed(&vm.id))
            .collect();
        if candidates.is_empty() {
            info!(
                "Node {}: {} VMs can migrate, but all are blacklisted due to recent failures",
                source.name,
                not_recent.len()
            );
            return None;
        }

        candidates.sort_by(|a, b| match self.selection {
            VmSelection::SmallestFirst => a.size_score().total_cmp(&b.size_score()),
            VmSelection::LargestFirst => b.size_score().total_cmp(&a.size_score()),
        });

        let selected = candidates[0];
        debug!(
            "Node {}: Selected VM {} for migration (CPU: {}, Memory: {}MB)",
            source.name, selected.name, selected.cpu_cores, selected.memory_mb
        );

        Some(selected.clone())
    }

    fn log_no_candidates(&self, on_node: &[&VmInfo], source: &NodeInfo) {
        if on_node.is_empty() {
            info!("Node {}: No VMs found on this node", source.name);
            return;
        }

        let mut blocked_states: HashMap<&str, usize> = HashMap::new();
        for vm in on_node {
            if !vm.can_migrate {
                *blocked_states.entry(vm.state.as_str()).or_default() += 1;
            }
        }
        info!(
            "Node {}: {} VMs present, but none can migrate. VM states: {:?}",
            source.name,
            on_node.len(),
            blocked_states
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;

    const HOUR: Duration = Duration::from_secs(3600);

    fn source() -> NodeInfo {
        NodeInfo {
            id: "1".to_string(),
            name: "src".to_string(),
            cpu_total: 1,
            cpu_used: 10,
            memory_total_mb: 100,
            memory_used_mb: 90,
            vm_count: 3,
            vm_limit: 0,
            is_maintenance: false,
            vm_creation_allowed: true,
            qemu_version: String::new(),
        }
    }

    fn vm(id: &str, node_id: &str, cpu: u32, mem: u64, can_migrate: bool) -> VmInfo {
        VmInfo {
            id: id.to_string(),
            name: format!("vm-{}", id),
            node_id: node_id.to_string(),
            cpu_cores: cpu,
            memory_mb: mem,
            state: if can_migrate { "active" } else { "stopped" }.to_string(),
            can_migrate,
        }
    }

    #[test]
    fn test_selects_smallest_vm() {
        let strategy = MigrationStrategy::new(VmSelection::SmallestFirst);
        let ledger = MigrationLedger::new(HOUR, HOUR);

        let vms = vec![
            vm("big", "1", 8, 16384, true),
            vm("small", "1", 1, 1024, true),
            vm("mid", "1", 4, 4096, true),
        ];

        let selected = strategy.select_candidate(&vms, &source(), &ledger).unwrap();
        assert_eq!(selected.id, "small");
    }

    #[test]
    fn test_largest_first_ordering() {
        let strategy = MigrationStrategy::new(VmSelection::LargestFirst);
        let ledger = MigrationLedger::new(HOUR, HOUR);

        let vms = vec![
            vm("small", "1", 1, 1024, true),
            vm("big", "1", 8, 16384, true),
        ];

        let selected = strategy.select_candidate(&vms, &source(), &ledger).unwrap();
        assert_eq!(selected.id, "big");
    }

    #[test]
    fn test_ignores_vms_on_other_nodes() {
        let strategy = MigrationStrategy::new(VmSelection::SmallestFirst);
        let ledger = MigrationLedger::new(HOUR, HOUR);

        let vms = vec![vm("elsewhere", "2", 1, 1024, true)];
        assert!(strategy.select_candidate(&vms, &source(), &ledger).is_none());
    }

    #[test]
    fn test_skips_non_migratable_vms() {
        let strategy = MigrationStrategy::new(VmSelection::SmallestFirst);
        let ledger = MigrationLedger::new(HOUR, HOUR);

        let vms = vec![
            vm("stuck", "1", 1, 1024, false),
            vm("mobile", "1", 4, 4096, true),
        ];

        let selected = strategy.select_candidate(&vms, &source(), &ledger).unwrap();
        assert_eq!(selected.id, "mobile");
    }

    #[test]
    fn test_recently_migrated_vm_is_not_reselected() {
        let strategy = MigrationStrategy::new(VmSelection::SmallestFirst);
        let mut ledger = MigrationLedger::new(HOUR, HOUR);
        ledger.record_success_at("only", Utc::now() - chrono::Duration::minutes(10));

        let vms = vec![vm("only", "1", 1, 1024, true)];
        assert!(strategy.select_candidate(&vms, &source(), &ledger).is_none());
    }

    #[test]
    fn test_blacklisted_vm_is_not_selected() {
        let strategy = MigrationStrategy::new(VmSelection::SmallestFirst);
        let mut ledger = MigrationLedger::new(HOUR, HOUR);
        ledger.record_failure("bad");

        let vms = vec![
            vm("bad", "1", 1, 1024, true),
            vm("good", "1", 4, 4096, true),
        ];

        let selected = strategy.select_candidate(&vms, &source(), &ledger).unwrap();
        assert_eq!(selected.id, "good");
    }

    #[test]
    fn test_expired_history_entry_allows_selection() {
        let strategy = MigrationStrategy::new(VmSelection::SmallestFirst);
        let mut ledger = MigrationLedger::new(HOUR, HOUR);
        ledger.record_success_at("old", Utc::now() - chrono::Duration::hours(2));

        let vms = vec![vm("old", "1", 1, 1024, true)];
        let selected = strategy.select_candidate(&vms, &source(), &ledger).unwrap();
        assert_eq!(selected.id, "old");
    }

    #[test]
    fn test_selection_order_parsing() {
        assert_eq!(
            "smallest-first".parse::<VmSelection>().unwrap(),
            VmSelection::SmallestFirst
        );
        assert_eq!(
            "largest-first".parse::<VmSelection>().unwrap(),
            VmSelection::LargestFirst
        );
        assert!("random".parse::<VmSelection>().is_err());
    }
}
