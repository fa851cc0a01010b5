//! Cluster node representation

use serde::{Deserialize, Serialize};

/// A hypervisor host within a cluster.
///
/// `cpu_used` is the sum of vCPUs assigned to VMs on the node, not a
/// measured load; the balancer reasons about allocation only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub name: String,
    pub cpu_total: u32,
    pub cpu_used: u32,
    pub memory_total_mb: u64,
    pub memory_used_mb: u64,
    pub vm_count: u32,
    /// VM limit for this node, zero or negative meaning unlimited.
    pub vm_limit: i64,
    pub is_maintenance: bool,
    pub vm_creation_allowed: bool,
    /// QEMU version string, empty when unknown.
    pub qemu_version: String,
}

impl NodeInfo {
    /// vCPU to physical core allocation ratio; may exceed 1.0 with
    /// oversubscription.
    pub fn cpu_allocation_ratio(&self) -> f64 {
        if self.cpu_total == 0 {
            0.0
        } else {
            self.cpu_used as f64 / self.cpu_total as f64
        }
    }

    /// Allocated memory as a percentage of total.
    pub fn memory_usage_percent(&self) -> f64 {
        if self.memory_total_mb == 0 {
            0.0
        } else {
            self.memory_used_mb as f64 / self.memory_total_mb as f64 * 100.0
        }
    }

    /// Whether the node may receive migrated VMs at all: not in
    /// maintenance, VM creation allowed, and under its VM limit.
    pub fn can_accept_vms(&self) -> bool {
        let vm_limit_ok = self.vm_limit <= 0 || (self.vm_count as i64) < self.vm_limit;
        !self.is_maintenance && self.vm_creation_allowed && vm_limit_ok
    }
}
