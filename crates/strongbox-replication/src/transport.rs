use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::node::Node;
use crate::types::ReplicatedMutation;

/// Path a replica serves for propagated mutations.
pub const APPLY_PATH: &str = "/_replica/apply";
/// Path a node serves for liveness probes.
pub const HEALTH_PATH: &str = "/_replica/health";

/// Carries mutations from the primary to one replica.
#[async_trait]
pub trait ReplicaTransport: Send + Sync {
    /// Deliver a mutation. `Ok` means the replica applied it.
    async fn send(&self, node: &Node, mutation: &ReplicatedMutation) -> anyhow::Result<()>;

    /// Cheap liveness check used by the health probe.
    async fn ping(&self, node: &Node) -> anyhow::Result<()>;
}

/// Replica-side receiver of propagated mutations.
#[async_trait]
pub trait ReplicaHandler: Send + Sync {
    async fn apply(&self, mutation: ReplicatedMutation) -> anyhow::Result<()>;
}

/// JSON over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, token })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ReplicaTransport for HttpTransport {
    async fn send(&self, node: &Node, mutation: &ReplicatedMutation) -> anyhow::Result<()> {
        let url = format!("{}{APPLY_PATH}", node.endpoint);
        let response = self
            .authorize(self.client.post(&url))
            .json(mutation)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("replica {} rejected {}: {status} {body}", node.id, mutation.id);
        }
        Ok(())
    }

    async fn ping(&self, node: &Node) -> anyhow::Result<()> {
        let url = format!("{}{HEALTH_PATH}", node.endpoint);
        self.authorize(self.client.get(&url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Delivers mutations to handlers living in the same process.
///
/// Nodes can be taken offline or slowed down, which makes multi-node
/// behaviour reproducible without sockets.
#[derive(Default)]
pub struct InProcessTransport {
    handlers: Mutex<HashMap<u64, Arc<dyn ReplicaHandler>>>,
    offline: Mutex<HashSet<u64>>,
    delays: Mutex<HashMap<u64, Duration>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node_id: u64, handler: Arc<dyn ReplicaHandler>) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id, handler);
    }

    pub fn set_offline(&self, node_id: u64, offline: bool) {
        let mut set = self.offline.lock().unwrap_or_else(PoisonError::into_inner);
        if offline {
            set.insert(node_id);
        } else {
            set.remove(&node_id);
        }
    }

    pub fn set_delay(&self, node_id: u64, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id, delay);
    }

    async fn reach(&self, node_id: u64) -> anyhow::Result<Option<Arc<dyn ReplicaHandler>>> {
        let delay = self
            .delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node_id)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .offline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&node_id)
        {
            anyhow::bail!("node {node_id} is offline");
        }
        Ok(self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node_id)
            .cloned())
    }
}

#[async_trait]
impl ReplicaTransport for InProcessTransport {
    async fn send(&self, node: &Node, mutation: &ReplicatedMutation) -> anyhow::Result<()> {
        let handler = self
            .reach(node.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no handler registered for node {}", node.id))?;
        handler.apply(mutation.clone()).await
    }

    async fn ping(&self, node: &Node) -> anyhow::Result<()> {
        self.reach(node.id).await?;
        Ok(())
    }
}
