//! Post-migration resource estimation and QEMU compatibility
//!
//! A placement is safe when the target stays below the *overload*
//! thresholds after receiving the VM. The target thresholds only gate
//! eligibility before any migration is considered; this check gates
//! whether one specific placement would push the target back into
//! overload.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::inventory::{NodeInfo, VmInfo};

static QEMU_VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)*").unwrap());

pub struct ResourceEstimator {
    cpu_overload_threshold: f64,
    memory_overload_threshold: f64,
}

impl ResourceEstimator {
    pub fn new(cpu_overload_threshold: f64, memory_overload_threshold: f64) -> Self {
        Self {
            cpu_overload_threshold,
            memory_overload_threshold,
        }
    }

    /// Predicted (cpu allocation ratio, memory percent) on the target
    /// after it receives the VM.
    pub fn estimate_after_migration(&self, target: &NodeInfo, vm: &VmInfo) -> (f64, f64) {
        let cpu_after = if target.cpu_total == 0 {
            // A node with no reported cores can never be validated
            f64::INFINITY
        } else {
            (target.cpu_used + vm.cpu_cores) as f64 / target.cpu_total as f64
        };

        let memory_after = if target.memory_total_mb == 0 {
            f64::INFINITY
        } else {
            target.memory_usage_percent() + vm.memory_mb as f64 / target.memory_total_mb as f64 * 100.0
        };

        (cpu_after, memory_after)
    }

    /// Whether the target can take the VM without itself becoming
    /// overloaded, and whether the hypervisors are live-migration
    /// compatible.
    pub fn can_accept(&self, target: &NodeInfo, vm: &VmInfo, source: &NodeInfo) -> bool {
        let (cpu_after, memory_after) = self.estimate_after_migration(target, vm);

        let cpu_ok = cpu_after < self.cpu_overload_threshold;
        let memory_ok = memory_after < self.memory_overload_threshold;
        let qemu_ok = self.check_qemu_compatibility(target, source, vm);

        debug!(
            "Can {} accept VM {}? Current: CPU {:.1}:1, Memory {:.1}% | After: CPU {:.1}:1, \
             Memory {:.1}% | CPU_ok={}, Memory_ok={}, QEMU_ok={}",
            target.name,
            vm.name,
            target.cpu_allocation_ratio(),
            target.memory_usage_percent(),
            cpu_after,
            memory_after,
            cpu_ok,
            memory_ok,
            qemu_ok
        );

        cpu_ok && memory_ok && qemu_ok
    }

    fn check_qemu_compatibility(&self, target: &NodeInfo, source: &NodeInfo, vm: &VmInfo) -> bool {
        if target.qemu_version.is_empty() && source.qemu_version.is_empty() {
            debug!(
                "QEMU version unknown for both source ({}) and target ({}) nodes",
                source.name, target.name
            );
            return true;
        }
        if target.qemu_version.is_empty() {
            debug!("QEMU version unknown for target node {}", target.name);
            return true;
        }
        if source.qemu_version.is_empty() {
            debug!("QEMU version unknown for source node {}", source.name);
            return true;
        }

        let compatible = qemu_compatible(&source.qemu_version, &target.qemu_version);
        if !compatible {
            warn!(
                "QEMU version incompatible for VM {}: source node {} has QEMU {}, target node {} \
                 has QEMU {}. Target QEMU version must be equal or newer than source.",
                vm.name, source.name, source.qemu_version, target.name, target.qemu_version
            );
        }
        compatible
    }
}

/// Compare QEMU versions; the target must be equal to or newer than the
/// source. Unknown versions are permissive, the remote API gets the
/// final say.
pub fn qemu_compatible(source_version: &str, target_version: &str) -> bool {
    if source_version.is_empty() || target_version.is_empty() {
        return true;
    }
    parse_qemu_version(target_version) >= parse_qemu_version(source_version)
}

/// Extract the leading dotted integer tuple from a version string,
/// ignoring any distro suffix such as `-1ubuntu1`.
fn parse_qemu_version(version: &str) -> Vec<u64> {
    match QEMU_VERSION_REGEX.find(version.trim()) {
        Some(numeric) => numeric
            .as_str()
            .split('.')
            .filter_map(|part| part.parse().ok())
            .collect(),
        None => vec![0],
    }
}
