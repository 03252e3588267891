use serde::{Deserialize, Serialize};
use std::fmt;
use strongbox_core::config::NodeConfig;
use strongbox_core::types::NodeRole;

/// A member of the replication topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: u64,
    /// Base URL, e.g. `http://10.0.0.2:8700`.
    pub endpoint: String,
    pub role: NodeRole,
}

impl From<&NodeConfig> for Node {
    fn from(config: &NodeConfig) -> Self {
        Self {
            id: config.id,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            role: config.role,
        }
    }
}

/// Health of a node as observed by the replication path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    #[default]
    Healthy,
    /// Missed at least one acknowledgment, still receives mutations.
    Degraded,
    /// Skipped by propagation until the health probe reaches it again.
    Unreachable,
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeHealth::Healthy => write!(f, "healthy"),
            NodeHealth::Degraded => write!(f, "degraded"),
            NodeHealth::Unreachable => write!(f, "unreachable"),
        }
    }
}
