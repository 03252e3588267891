use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use strongbox_core::config::StrongboxConfig;
use strongbox_core::types::NodeRole;
use tracing::{info, warn};

use crate::node::{Node, NodeHealth};

#[derive(Debug, Clone, Copy, Default)]
struct HealthRecord {
    health: NodeHealth,
    consecutive_failures: u32,
}

/// Point-in-time view of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub id: u64,
    pub endpoint: String,
    pub role: NodeRole,
    pub health: NodeHealth,
    pub consecutive_failures: u32,
}

/// Configured nodes plus the health view fed by replication traffic.
///
/// Membership is fixed after construction. Health has its own lock and is
/// independent of any per-resource lock.
pub struct Topology {
    local_id: u64,
    nodes: Vec<Node>,
    replication_factor: u32,
    unreachable_after: u32,
    health: RwLock<HashMap<u64, HealthRecord>>,
}

impl Topology {
    pub fn new(
        local_id: u64,
        nodes: Vec<Node>,
        replication_factor: u32,
        unreachable_after: u32,
    ) -> Self {
        let health = nodes
            .iter()
            .map(|n| (n.id, HealthRecord::default()))
            .collect();
        Self {
            local_id,
            nodes,
            replication_factor: replication_factor.max(1),
            unreachable_after: unreachable_after.max(1),
            health: RwLock::new(health),
        }
    }

    pub fn from_config(config: &StrongboxConfig) -> Self {
        Self::new(
            config.replication.node_id,
            config.nodes.iter().map(Node::from).collect(),
            config.replication.replication_factor,
            config.replication.unreachable_after,
        )
    }

    /// A topology with no peers.
    pub fn standalone(local_id: u64) -> Self {
        Self::new(local_id, Vec::new(), 1, 1)
    }

    pub fn local_id(&self) -> u64 {
        self.local_id
    }

    pub fn replication_factor(&self) -> u32 {
        self.replication_factor
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Replica-role nodes other than this one, in configured order.
    pub fn replicas(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(move |n| n.id != self.local_id && n.role == NodeRole::Replica)
    }

    pub fn local_role(&self) -> NodeRole {
        self.nodes
            .iter()
            .find(|n| n.id == self.local_id)
            .map(|n| n.role)
            .unwrap_or(NodeRole::Primary)
    }

    pub fn health(&self, id: u64) -> NodeHealth {
        self.health
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|r| r.health)
            .unwrap_or(NodeHealth::Unreachable)
    }

    pub fn health_view(&self) -> Vec<NodeStatus> {
        let health = self.health.read().unwrap_or_else(PoisonError::into_inner);
        self.nodes
            .iter()
            .map(|n| {
                let record = health.get(&n.id).copied().unwrap_or_default();
                NodeStatus {
                    id: n.id,
                    endpoint: n.endpoint.clone(),
                    role: n.role,
                    health: record.health,
                    consecutive_failures: record.consecutive_failures,
                }
            })
            .collect()
    }

    /// An acknowledgment or a successful probe: the node is Healthy again.
    pub fn record_success(&self, id: u64) {
        let mut health = self.health.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = health.get_mut(&id) {
            if record.health != NodeHealth::Healthy {
                info!(node = id, previous = %record.health, "node healthy");
            }
            *record = HealthRecord::default();
        }
    }

    /// A missed acknowledgment. Returns the node's new health.
    pub fn record_failure(&self, id: u64) -> NodeHealth {
        let mut health = self.health.write().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = health.get_mut(&id) else {
            return NodeHealth::Unreachable;
        };
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        let next = if record.consecutive_failures >= self.unreachable_after {
            NodeHealth::Unreachable
        } else {
            NodeHealth::Degraded
        };
        if next != record.health {
            warn!(
                node = id,
                failures = record.consecutive_failures,
                health = %next,
                "node health changed"
            );
        }
        record.health = next;
        next
    }
}
