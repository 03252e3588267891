use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::node::NodeHealth;
use crate::topology::Topology;
use crate::transport::ReplicaTransport;

/// Ping every replica that is not Healthy; a successful ping makes it
/// Healthy again so propagation resumes. Failed pings leave its state alone.
pub async fn probe_once(
    topology: &Topology,
    transport: &dyn ReplicaTransport,
    timeout: Duration,
) {
    let suspects: Vec<_> = topology
        .replicas()
        .filter(|n| topology.health(n.id) != NodeHealth::Healthy)
        .cloned()
        .collect();

    for node in suspects {
        match tokio::time::timeout(timeout, transport.ping(&node)).await {
            Ok(Ok(())) => topology.record_success(node.id),
            Ok(Err(e)) => debug!(node = node.id, error = %e, "health probe failed"),
            Err(_) => debug!(node = node.id, "health probe timed out"),
        }
    }
}

/// Run [`probe_once`] every `interval` until the handle is aborted.
pub fn spawn_health_probe(
    topology: Arc<Topology>,
    transport: Arc<dyn ReplicaTransport>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            probe_once(&topology, transport.as_ref(), timeout).await;
        }
    })
}
