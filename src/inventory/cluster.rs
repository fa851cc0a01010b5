//! Cluster representation

use serde::{Deserialize, Serialize};

use super::NodeInfo;

/// A named grouping of nodes sharing migration capability. Owns the node
/// snapshot taken when the cluster list was fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub id: String,
    pub name: String,
    pub nodes: Vec<NodeInfo>,
}

impl ClusterInfo {
    /// Look up a node of this cluster by id.
    pub fn node_by_id(&self, node_id: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}
