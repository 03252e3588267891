#![allow(dead_code)]

use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use strongbox_core::audit::{AuditFilter, AuditRecord, MemoryAuditSink};
use strongbox_core::catalog::Catalog;
use strongbox_core::config::{NodeConfig, StrongboxConfig};
use strongbox_core::crypto::EncryptionManager;
use strongbox_core::types::{ContainerPath, KeyMaterial, NodeRole, ObjectKey};
use strongbox_engine::{
    ContainerEngine, EngineContext, EngineParts, ObjectEngine, ReplicaApplier, RequestContext,
    SharedContext,
};
use strongbox_replication::InProcessTransport;
use strongbox_storage::MemoryStorageProvider;

pub const MAX_OBJECT_BYTES: u64 = 64 * 1024;

pub struct TestNode {
    pub ctx: SharedContext,
    pub containers: ContainerEngine,
    pub objects: ObjectEngine,
    pub storage: Arc<MemoryStorageProvider>,
}

impl TestNode {
    /// Every audit record for `resource`, in order.
    pub async fn audit_for(&self, resource: &str) -> Vec<AuditRecord> {
        self.ctx.audit.flush().await;
        self.ctx
            .audit
            .entries(AuditFilter::resource(resource))
            .try_collect()
            .await
            .unwrap()
    }

    pub async fn all_audit(&self) -> Vec<AuditRecord> {
        self.ctx.audit.flush().await;
        self.ctx
            .audit
            .entries(AuditFilter::default())
            .try_collect()
            .await
            .unwrap()
    }
}

pub struct TestCluster {
    pub nodes: Vec<TestNode>,
    pub transport: Arc<InProcessTransport>,
}

impl TestCluster {
    pub fn primary(&self) -> &TestNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: u64) -> &TestNode {
        &self.nodes[(id - 1) as usize]
    }
}

/// Same key on every node, as when the keyfile is shared.
fn crypto() -> EncryptionManager {
    EncryptionManager::new(
        KeyMaterial {
            id: "test-key".into(),
            key: [7u8; 32],
        },
        [],
    )
}

async fn build_node(config: StrongboxConfig, transport: Arc<InProcessTransport>) -> TestNode {
    let storage = Arc::new(MemoryStorageProvider::new());
    let ctx = EngineContext::assemble(
        config,
        EngineParts {
            catalog: Catalog::open_in_memory().unwrap(),
            storage: storage.clone(),
            audit_sink: Arc::new(MemoryAuditSink::new()),
            crypto: crypto(),
            transport,
        },
    )
    .await
    .unwrap();
    TestNode {
        containers: ContainerEngine::new(ctx.clone()),
        objects: ObjectEngine::new(ctx.clone()),
        ctx,
        storage,
    }
}

fn base_config() -> StrongboxConfig {
    let mut config = StrongboxConfig::default();
    config.store.max_object_bytes = MAX_OBJECT_BYTES;
    config.store.lock_timeout_ms = 2_000;
    config
}

pub async fn single_node() -> TestNode {
    build_node(base_config(), Arc::new(InProcessTransport::new())).await
}

/// `n` nodes wired through one in-process transport. Node 1 is the primary.
pub async fn cluster(n: u64, replication_factor: u32, replica_timeout: Duration) -> TestCluster {
    let transport = Arc::new(InProcessTransport::new());
    let members: Vec<NodeConfig> = (1..=n)
        .map(|id| NodeConfig {
            id,
            endpoint: format!("mem://node-{id}"),
            role: if id == 1 {
                NodeRole::Primary
            } else {
                NodeRole::Replica
            },
        })
        .collect();

    let mut nodes = Vec::new();
    for id in 1..=n {
        let mut config = base_config();
        config.nodes = members.clone();
        config.replication.node_id = id;
        config.replication.replication_factor = replication_factor;
        config.replication.replica_timeout_ms = replica_timeout.as_millis() as u64;
        config.replication.unreachable_after = 2;

        let node = build_node(config, transport.clone()).await;
        transport.register(id, Arc::new(ReplicaApplier::new(node.ctx.clone())));
        nodes.push(node);
    }
    TestCluster { nodes, transport }
}

pub fn req(actor: &str) -> RequestContext {
    RequestContext::new(actor, Duration::from_secs(2))
}

pub fn path(raw: &str) -> ContainerPath {
    ContainerPath::parse(raw).unwrap()
}

pub fn key(raw: &str) -> ObjectKey {
    ObjectKey::parse(raw).unwrap()
}
