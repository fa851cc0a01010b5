//! Wire types for the VMManager 6 REST API
//!
//! Payloads only carry the fields the balancer reads; everything else in
//! the remote responses is ignored. Ids are integers on the wire and
//! strings in the inventory types.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::inventory::{NodeInfo, VmInfo};

#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// List endpoints answer `{"list": [...]}`, but older builds have been
/// seen returning a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListResponse<T> {
    Wrapped {
        #[serde(default = "Vec::new")]
        list: Vec<T>,
    },
    Bare(Vec<T>),
}

impl<T> ListResponse<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Wrapped { list } => list,
            ListResponse::Bare(list) => list,
        }
    }
}

/// Nested `{"id": ...}` reference, e.g. `cluster.id` or `node.id`.
#[derive(Debug, Default, Deserialize)]
pub struct IdRef {
    #[serde(default)]
    pub id: Option<i64>,
}

impl IdRef {
    pub fn id_string(&self) -> String {
        self.id.map(|id| id.to_string()).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
pub struct ClusterPayload {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CpuStat {
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub used: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct RamStat {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub allocated: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct VmStat {
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Deserialize)]
pub struct NodePayload {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub cluster: IdRef,
    #[serde(default)]
    pub cpu: CpuStat,
    #[serde(default)]
    pub ram_mib: RamStat,
    #[serde(default)]
    pub vm: VmStat,
    #[serde(default)]
    pub maintenance_mode: bool,
    // Older API builds used a bare "maintenance" flag.
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub host_creation_blocked: bool,
    #[serde(default)]
    pub host_limit: i64,
    #[serde(default)]
    pub qemu_version: String,
}

impl NodePayload {
    pub fn into_node(self) -> NodeInfo {
        NodeInfo {
            id: self.id.to_string(),
            name: self.name,
            cpu_total: self.cpu.number,
            cpu_used: self.cpu.used,
            memory_total_mb: self.ram_mib.total,
            memory_used_mb: self.ram_mib.allocated,
            vm_count: self.vm.total,
            vm_limit: self.host_limit,
            is_maintenance: self.maintenance_mode || self.maintenance,
            vm_creation_allowed: !self.host_creation_blocked,
            qemu_version: self.qemu_version,
        }
    }
}

fn default_balancer_mode() -> String {
    // A VM without the field has never opted in to balancing.
    "off".to_string()
}

#[derive(Debug, Deserialize)]
pub struct VmPayload {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub cluster: IdRef,
    #[serde(default)]
    pub node: IdRef,
    #[serde(default)]
    pub cpu_number: u32,
    #[serde(default)]
    pub ram_mib: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub iso_mounted: bool,
    #[serde(default)]
    pub snapshot_count: u32,
    #[serde(default = "default_balancer_mode")]
    pub balancer_mode: String,
}

impl VmPayload {
    /// Live-migration eligibility: the VM must be running, carry no
    /// mounted ISO, have no snapshots, and not be opted out of balancing.
    pub fn can_migrate(&self) -> bool {
        if !self.state.eq_ignore_ascii_case("active") {
            debug!(
                "VM {} cannot migrate: state is '{}', must be 'active'",
                self.name, self.state
            );
            return false;
        }
        if self.iso_mounted {
            debug!("VM {} cannot migrate: has mounted ISO", self.name);
            return false;
        }
        if self.snapshot_count > 0 {
            debug!(
                "VM {} cannot migrate: has {} snapshots",
                self.name, self.snapshot_count
            );
            return false;
        }
        if self.balancer_mode == "off" {
            debug!(
                "VM {} cannot migrate: balancer is disabled (mode: {})",
                self.name, self.balancer_mode
            );
            return false;
        }
        true
    }

    pub fn into_vm(self) -> VmInfo {
        let can_migrate = self.can_migrate();
        VmInfo {
            id: self.id.to_string(),
            name: self.name,
            node_id: self.node.id_string(),
            cpu_cores: self.cpu_number,
            memory_mb: self.ram_mib,
            state: self.state,
            can_migrate,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MigrateRequest {
    pub node: i64,
}

#[derive(Debug, Deserialize)]
pub struct MigrateResponse {
    #[serde(default)]
    pub id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TaskPayload {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub progress: Option<serde_json::Value>,
    #[serde(default)]
    pub progress_percent: Option<f64>,
    #[serde(default)]
    pub remaining_time: Option<i64>,
    #[serde(default)]
    pub current_step: Option<String>,
}
