//! Node classification for one cluster
//!
//! Splits a cluster's nodes into overloaded migration sources and viable
//! migration targets, honoring the operator's exclusion lists. Both
//! lists come back ordered: sources most-loaded first, targets
//! emptiest first.

use std::collections::HashSet;

use tracing::debug;

use crate::config::BalancerConfig;
use crate::inventory::NodeInfo;

pub struct NodeAnalyzer {
    cpu_overload_threshold: f64,
    memory_overload_threshold: f64,
    cpu_target_threshold: f64,
    memory_target_threshold: f64,
    excluded_source_nodes: HashSet<String>,
    excluded_target_nodes: HashSet<String>,
}

impl NodeAnalyzer {
    pub fn new(config: &BalancerConfig) -> Self {
        Self {
            cpu_overload_threshold: config.cpu_overload_threshold,
            memory_overload_threshold: config.memory_overload_threshold,
            cpu_target_threshold: config.cpu_target_threshold,
            memory_target_threshold: config.memory_target_threshold,
            excluded_source_nodes: config.exclude_source_nodes.clone(),
            excluded_target_nodes: config.exclude_target_nodes.clone(),
        }
    }

    /// Nodes that should shed VMs, most loaded first.
    pub fn find_overloaded(&self, nodes: &[NodeInfo]) -> Vec<NodeInfo> {
        let mut overloaded: Vec<NodeInfo> = nodes
            .iter()
            .filter(|node| {
                if self.is_excluded_source(node) {
                    debug!("Node {} excluded from migration sources", node.name);
                    return false;
                }
                self.is_overloaded(node)
            })
            .cloned()
            .collect();

        overloaded.sort_by(|a, b| Self::load_score(b).total_cmp(&Self::load_score(a)));
        overloaded
    }

    /// Nodes with capacity for more VMs, emptiest first.
    pub fn find_underloaded(&self, nodes: &[NodeInfo]) -> Vec<NodeInfo> {
        let mut underloaded = Vec::new();

        for node in nodes {
            if self.is_excluded_target(node) {
                debug!("Node {} excluded from migration targets", node.name);
                continue;
            }

            let qemu_info = if node.qemu_version.is_empty() {
                "unknown".to_string()
            } else {
                node.qemu_version.clone()
            };
            debug!(
                "Checking node {}: maintenance={}, vm_creation_allowed={}, vm_count={}, \
                 vm_limit={}, can_accept_vms={}, CPU_ratio={:.1}:1 ({}/{}), Memory={:.1}%, QEMU={}",
                node.name,
                node.is_maintenance,
                node.vm_creation_allowed,
                node.vm_count,
                node.vm_limit,
                node.can_accept_vms(),
                node.cpu_allocation_ratio(),
                node.cpu_used,
                node.cpu_total,
                node.memory_usage_percent(),
                qemu_info
            );

            if self.has_capacity(node) {
                debug!("Node {} accepted as underloaded target", node.name);
                underloaded.push(node.clone());
            } else {
                self.log_rejection(node);
            }
        }

        underloaded.sort_by(|a, b| {
            a.cpu_allocation_ratio()
                .total_cmp(&b.cpu_allocation_ratio())
                .then(a.memory_usage_percent().total_cmp(&b.memory_usage_percent()))
        });
        underloaded
    }

    fn is_excluded_source(&self, node: &NodeInfo) -> bool {
        self.excluded_source_nodes.contains(&node.name)
            || self.excluded_source_nodes.contains(&node.id)
    }

    fn is_excluded_target(&self, node: &NodeInfo) -> bool {
        self.excluded_target_nodes.contains(&node.name)
            || self.excluded_target_nodes.contains(&node.id)
    }

    fn is_overloaded(&self, node: &NodeInfo) -> bool {
        let cpu_overloaded = node.cpu_allocation_ratio() > self.cpu_overload_threshold;
        let memory_overloaded = node.memory_usage_percent() > self.memory_overload_threshold;
        !node.is_maintenance && (cpu_overloaded || memory_overloaded)
    }

    fn has_capacity(&self, node: &NodeInfo) -> bool {
        let cpu_has_capacity = node.cpu_allocation_ratio() < self.cpu_target_threshold;
        let memory_has_capacity = node.memory_usage_percent() < self.memory_target_threshold;
        node.can_accept_vms() && cpu_has_capacity && memory_has_capacity
    }

    fn load_score(node: &NodeInfo) -> f64 {
        node.cpu_allocation_ratio() + node.memory_usage_percent() / 100.0
    }

    fn log_rejection(&self, node: &NodeInfo) {
        let mut reasons = Vec::new();

        if !node.can_accept_vms() {
            if node.is_maintenance {
                reasons.push("in maintenance".to_string());
            }
            if !node.vm_creation_allowed {
                reasons.push("VM creation disabled".to_string());
            }
            if node.vm_limit > 0 && (node.vm_count as i64) >= node.vm_limit {
                reasons.push(format!(
                    "VM limit reached ({}/{})",
                    node.vm_count, node.vm_limit
                ));
            }
        }
        if node.cpu_allocation_ratio() >= self.cpu_target_threshold {
            reasons.push(format!(
                "CPU allocation too high ({:.1}:1)",
                node.cpu_allocation_ratio()
            ));
        }
        if node.memory_usage_percent() >= self.memory_target_threshold {
            reasons.push(format!(
                "Memory too high ({:.1}%)",
                node.memory_usage_percent()
            ));
        }
        if reasons.is_empty() {
            reasons.push("unknown reason".to_string());
        }

        debug!("Node {} rejected: {}", node.name, reasons.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer(config: &BalancerConfig) -> NodeAnalyzer {
        NodeAnalyzer::new(config)
    }

    fn node(id: &str, name: &str, cpu_total: u32, cpu_used: u32, mem_pct: u64) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            name: name.to_string(),
            cpu_total,
            cpu_used,
            memory_total_mb: 100,
            memory_used_mb: mem_pct,
            vm_count: 2,
            vm_limit: 0,
            is_maintenance: false,
            vm_creation_allowed: true,
            qemu_version: String::new(),
        }
    }

    #[test]
    fn test_overloaded_detection_by_cpu_or_memory() {
        let config = BalancerConfig::default();
        let analyzer = analyzer(&config);

        let nodes = vec![
            node("1", "cpu-hot", 1, 8, 40),  // ratio 8.0 > 7.0
            node("2", "mem-hot", 4, 4, 90),  // memory 90% > 70%
            node("3", "calm", 4, 4, 40),     // neither
        ];

        let overloaded = analyzer.find_overloaded(&nodes);
        let names: Vec<&str> = overloaded.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["cpu-hot", "mem-hot"]);
    }

    #[test]
    fn test_overloaded_sorted_most_loaded_first() {
        let config = BalancerConfig::default();
        let analyzer = analyzer(&config);

        let nodes = vec![
            node("1", "warm", 1, 8, 10),  // score 8.1
            node("2", "hot", 1, 10, 50),  // score 10.5
        ];

        let overloaded = analyzer.find_overloaded(&nodes);
        assert_eq!(overloaded[0].name, "hot");
        assert_eq!(overloaded[1].name, "warm");
    }

    #[test]
    fn test_maintenance_node_is_never_a_source() {
        let config = BalancerConfig::default();
        let analyzer = analyzer(&config);

        let mut hot = node("1", "hot", 1, 10, 90);
        hot.is_maintenance = true;
        assert!(analyzer.find_overloaded(&[hot]).is_empty());
    }

    #[test]
    fn test_source_exclusion_by_name_and_id() {
        let mut config = BalancerConfig::default();
        config.exclude_source_nodes.insert("hot".to_string());
        config.exclude_source_nodes.insert("2".to_string());
        let analyzer = analyzer(&config);

        let nodes = vec![
            node("1", "hot", 1, 10, 90),      // excluded by name
            node("2", "hotter", 1, 12, 90),   // excluded by id
            node("3", "hottest", 1, 14, 90),
        ];

        let overloaded = analyzer.find_overloaded(&nodes);
        assert_eq!(overloaded.len(), 1);
        assert_eq!(overloaded[0].name, "hottest");
    }

    #[test]
    fn test_underloaded_requires_both_thresholds() {
        let config = BalancerConfig::default();
        let analyzer = analyzer(&config);

        let nodes = vec![
            node("1", "ok", 4, 4, 40),        // ratio 1.0 < 6.0, mem 40% < 80%
            node("2", "cpu-high", 1, 7, 40),  // ratio 7.0 >= 6.0
            node("3", "mem-high", 4, 4, 85),  // mem 85% >= 80%
        ];

        let underloaded = analyzer.find_underloaded(&nodes);
        assert_eq!(underloaded.len(), 1);
        assert_eq!(underloaded[0].name, "ok");
    }

    #[test]
    fn test_underloaded_sorted_emptiest_first() {
        let config = BalancerConfig::default();
        let analyzer = analyzer(&config);

        let nodes = vec![
            node("1", "busier", 4, 8, 40),  // ratio 2.0
            node("2", "empty", 4, 0, 10),   // ratio 0.0
            node("3", "mid", 4, 4, 20),     // ratio 1.0
        ];

        let underloaded = analyzer.find_underloaded(&nodes);
        let names: Vec<&str> = underloaded.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["empty", "mid", "busier"]);
    }

    #[test]
    fn test_underloaded_memory_breaks_cpu_ties() {
        let config = BalancerConfig::default();
        let analyzer = analyzer(&config);

        let nodes = vec![
            node("1", "fuller", 4, 4, 50),
            node("2", "emptier", 4, 4, 10),
        ];

        let underloaded = analyzer.find_underloaded(&nodes);
        assert_eq!(underloaded[0].name, "emptier");
    }

    #[test]
    fn test_target_rejects_maintenance_and_blocked_nodes() {
        let config = BalancerConfig::default();
        let analyzer = analyzer(&config);

        let mut maintenance = node("1", "maint", 4, 0, 10);
        maintenance.is_maintenance = true;
        let mut blocked = node("2", "blocked", 4, 0, 10);
        blocked.vm_creation_allowed = false;
        let mut full = node("3", "full", 4, 0, 10);
        full.vm_count = 5;
        full.vm_limit = 5;

        assert!(analyzer.find_underloaded(&[maintenance, blocked, full]).is_empty());
    }

    #[test]
    fn test_target_exclusion_by_name_and_id() {
        let mut config = BalancerConfig::default();
        config.exclude_target_nodes.insert("spare".to_string());
        config.exclude_target_nodes.insert("2".to_string());
        let analyzer = analyzer(&config);

        let nodes = vec![
            node("1", "spare", 4, 0, 10),
            node("2", "other", 4, 0, 10),
            node("3", "usable", 4, 0, 10),
        ];

        let underloaded = analyzer.find_underloaded(&nodes);
        assert_eq!(underloaded.len(), 1);
        assert_eq!(underloaded[0].name, "usable");
    }
}
