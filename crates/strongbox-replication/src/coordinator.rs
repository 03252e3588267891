use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::node::NodeHealth;
use crate::topology::Topology;
use crate::transport::ReplicaTransport;
use crate::types::{Mutation, ReplicatedMutation};

/// Result of propagating one mutation.
///
/// `required` and `acknowledged` count replica copies only; the primary's
/// own copy is implied.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReplicationOutcome {
    pub required: u32,
    pub acknowledged: u32,
    /// Replicas that failed or timed out before the call returned.
    pub failed: Vec<u64>,
    /// Unreachable replicas that were not contacted.
    pub skipped: Vec<u64>,
}

impl ReplicationOutcome {
    pub fn is_degraded(&self) -> bool {
        self.acknowledged < self.required
    }

    pub fn summary(&self) -> String {
        let mut text = format!(
            "{} of {} required replica acknowledgments",
            self.acknowledged, self.required
        );
        if !self.failed.is_empty() {
            text.push_str(&format!("; failed: {:?}", self.failed));
        }
        if !self.skipped.is_empty() {
            text.push_str(&format!("; skipped unreachable: {:?}", self.skipped));
        }
        text
    }
}

/// Primary-driven propagation of committed mutations.
///
/// Every reachable replica gets the mutation concurrently, each under its
/// own timeout. The call returns as soon as `replication_factor - 1`
/// replicas acknowledged; deliveries still in flight keep running in the
/// background and feed the health view when they finish.
///
/// Each mutation carries a sequence number so that a replica can refuse a
/// late delivery that would overwrite newer state.
#[derive(Clone)]
pub struct ReplicationCoordinator {
    topology: Arc<Topology>,
    transport: Arc<dyn ReplicaTransport>,
    replica_timeout: Duration,
    last_sequence: Arc<AtomicU64>,
}

impl ReplicationCoordinator {
    pub fn new(
        topology: Arc<Topology>,
        transport: Arc<dyn ReplicaTransport>,
        replica_timeout: Duration,
    ) -> Self {
        Self {
            topology,
            transport,
            replica_timeout,
            last_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Next sequence number: wall-clock microseconds, bumped past the
    /// previous value so it never repeats or goes back within a process.
    /// Seeding from the clock keeps it growing across restarts.
    fn next_sequence(&self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);
        let mut last = self.last_sequence.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last_sequence.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Send `op` to the replicas. `factor_override` replaces the configured
    /// replication factor for this mutation.
    pub async fn propagate(
        &self,
        op: Mutation,
        factor_override: Option<u32>,
    ) -> ReplicationOutcome {
        let factor = factor_override
            .unwrap_or_else(|| self.topology.replication_factor())
            .max(1);
        let mut outcome = ReplicationOutcome {
            required: factor - 1,
            ..ReplicationOutcome::default()
        };

        let mutation = Arc::new(ReplicatedMutation::new(
            self.topology.local_id(),
            self.next_sequence(),
            op,
        ));
        let mut pending = FuturesUnordered::new();

        for node in self.topology.replicas() {
            if self.topology.health(node.id) == NodeHealth::Unreachable {
                outcome.skipped.push(node.id);
                continue;
            }

            let node = node.clone();
            let mutation = mutation.clone();
            let transport = self.transport.clone();
            let topology = self.topology.clone();
            let timeout = self.replica_timeout;

            pending.push(tokio::spawn(async move {
                let result = tokio::time::timeout(timeout, transport.send(&node, &mutation)).await;
                let acked = match result {
                    Ok(Ok(())) => {
                        topology.record_success(node.id);
                        true
                    }
                    Ok(Err(e)) => {
                        warn!(
                            node = node.id,
                            mutation = %mutation.id,
                            error = %e,
                            "replica did not apply mutation"
                        );
                        topology.record_failure(node.id);
                        false
                    }
                    Err(_) => {
                        warn!(
                            node = node.id,
                            mutation = %mutation.id,
                            timeout_ms = timeout.as_millis() as u64,
                            "replica acknowledgment timed out"
                        );
                        topology.record_failure(node.id);
                        false
                    }
                };
                (node.id, acked)
            }));
        }

        while outcome.acknowledged < outcome.required {
            let Some(joined) = pending.next().await else {
                break;
            };
            match joined {
                Ok((_, true)) => outcome.acknowledged += 1,
                Ok((id, false)) => outcome.failed.push(id),
                Err(e) => warn!(error = %e, "replica delivery task aborted"),
            }
        }

        if outcome.is_degraded() {
            warn!(
                mutation = %mutation.id,
                op = mutation.op.name(),
                resource = %mutation.op.resource(),
                "replication degraded: {}",
                outcome.summary()
            );
        } else {
            debug!(
                mutation = %mutation.id,
                op = mutation.op.name(),
                acknowledged = outcome.acknowledged,
                in_flight = pending.len(),
                "mutation replicated"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::transport::{InProcessTransport, ReplicaHandler};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Instant;
    use strongbox_core::types::{ContainerPath, NodeRole};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        sequences: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl ReplicaHandler for Recorder {
        async fn apply(&self, mutation: ReplicatedMutation) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(mutation.op.resource().to_string());
            self.sequences.lock().unwrap().push(mutation.sequence);
            Ok(())
        }
    }

    struct Cluster {
        coordinator: ReplicationCoordinator,
        transport: Arc<InProcessTransport>,
        recorders: Vec<Arc<Recorder>>,
    }

    /// Node 1 is the primary; nodes 2..=n are replicas.
    fn cluster(n: u64, factor: u32, timeout: Duration) -> Cluster {
        let nodes = (1..=n)
            .map(|id| Node {
                id,
                endpoint: format!("mem://{id}"),
                role: if id == 1 { NodeRole::Primary } else { NodeRole::Replica },
            })
            .collect();
        let topology = Arc::new(Topology::new(1, nodes, factor, 2));
        let transport = Arc::new(InProcessTransport::new());
        let mut recorders = Vec::new();
        for id in 2..=n {
            let recorder = Arc::new(Recorder::default());
            transport.register(id, recorder.clone());
            recorders.push(recorder);
        }
        Cluster {
            coordinator: ReplicationCoordinator::new(topology, transport.clone(), timeout),
            transport,
            recorders,
        }
    }

    fn op(path: &str) -> Mutation {
        Mutation::DeleteContainer {
            path: ContainerPath::parse(path).unwrap(),
            cascade: false,
        }
    }

    #[tokio::test]
    async fn full_acknowledgment() {
        let c = cluster(3, 3, Duration::from_secs(1));
        let outcome = c.coordinator.propagate(op("c1"), None).await;
        assert_eq!(outcome.required, 2);
        assert_eq!(outcome.acknowledged, 2);
        assert!(!outcome.is_degraded());
        for r in &c.recorders {
            assert_eq!(*r.seen.lock().unwrap(), vec!["c1".to_string()]);
        }
    }

    #[tokio::test]
    async fn sequences_grow_with_every_mutation() {
        let c = cluster(2, 2, Duration::from_secs(1));
        for _ in 0..50 {
            c.coordinator.propagate(op("c1"), None).await;
        }
        let sequences = c.recorders[0].sequences.lock().unwrap().clone();
        assert_eq!(sequences.len(), 50);
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn failed_replica_degrades_without_error() {
        let c = cluster(3, 3, Duration::from_secs(1));
        c.transport.set_offline(3, true);

        let outcome = c.coordinator.propagate(op("c1"), None).await;
        assert!(outcome.is_degraded());
        assert_eq!(outcome.acknowledged, 1);
        assert_eq!(outcome.failed, vec![3]);
        assert!(outcome.summary().contains("1 of 2"));
        assert_eq!(c.coordinator.topology().health(3), NodeHealth::Degraded);
    }

    #[tokio::test]
    async fn unreachable_replicas_are_skipped() {
        let c = cluster(3, 3, Duration::from_secs(1));
        c.transport.set_offline(3, true);

        c.coordinator.propagate(op("c1"), None).await;
        c.coordinator.propagate(op("c2"), None).await;
        assert_eq!(c.coordinator.topology().health(3), NodeHealth::Unreachable);

        let outcome = c.coordinator.propagate(op("c3"), None).await;
        assert_eq!(outcome.skipped, vec![3]);
        assert!(outcome.failed.is_empty());
        assert!(outcome.is_degraded());
    }

    #[tokio::test]
    async fn slow_replica_times_out() {
        let c = cluster(2, 2, Duration::from_millis(50));
        c.transport.set_delay(2, Duration::from_millis(500));

        let started = Instant::now();
        let outcome = c.coordinator.propagate(op("c1"), None).await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(outcome.is_degraded());
        assert_eq!(outcome.failed, vec![2]);
    }

    #[tokio::test]
    async fn returns_once_enough_replicas_acknowledge() {
        let c = cluster(3, 2, Duration::from_secs(5));
        c.transport.set_delay(3, Duration::from_secs(2));

        let started = Instant::now();
        let outcome = c.coordinator.propagate(op("c1"), None).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(outcome.acknowledged, 1);
        assert!(!outcome.is_degraded());
    }

    #[tokio::test]
    async fn factor_override_applies() {
        let c = cluster(3, 1, Duration::from_secs(1));
        c.transport.set_offline(2, true);
        c.transport.set_offline(3, true);

        let relaxed = c.coordinator.propagate(op("c1"), None).await;
        assert_eq!(relaxed.required, 0);
        assert!(!relaxed.is_degraded());

        let strict = c.coordinator.propagate(op("c1"), Some(3)).await;
        assert_eq!(strict.required, 2);
        assert!(strict.is_degraded());
    }

    #[tokio::test]
    async fn factor_above_cluster_size_is_degraded() {
        let c = cluster(2, 3, Duration::from_secs(1));
        let outcome = c.coordinator.propagate(op("c1"), None).await;
        assert_eq!(outcome.acknowledged, 1);
        assert!(outcome.is_degraded());
    }
}
