//! Virtual machine representation

use serde::{Deserialize, Serialize};

/// A migratable workload. The remote API calls these "hosts".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    pub id: String,
    pub name: String,
    /// Id of the node currently hosting the VM.
    pub node_id: String,
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub state: String,
    /// Evaluated from the raw inventory payload when the VM is listed.
    pub can_migrate: bool,
}

impl VmInfo {
    /// Composite size metric used to order migration candidates.
    pub fn size_score(&self) -> f64 {
        self.cpu_cores as f64 + self.memory_mb as f64 / 1024.0
    }
}
