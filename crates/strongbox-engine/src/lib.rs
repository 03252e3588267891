//! Container and object engines.
//!
//! Both engines run every call through the same protocol: maintenance
//! check, locks in `ResourceKey` order, local mutation, replication,
//! one audit entry, release.

pub mod container;
pub mod context;
pub mod object;
pub mod replica;

pub use container::{ContainerEngine, DeleteMode};
pub use context::{Completed, EngineContext, EngineParts, RequestContext, SharedContext};
pub use object::{ObjectData, ObjectEngine};
pub use replica::ReplicaApplier;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;
    use strongbox_core::audit::MemoryAuditSink;
    use strongbox_core::catalog::Catalog;
    use strongbox_core::config::StrongboxConfig;
    use strongbox_core::crypto::EncryptionManager;
    use strongbox_replication::InProcessTransport;
    use strongbox_storage::MemoryStorageProvider;

    use crate::context::{EngineContext, EngineParts, RequestContext, SharedContext};

    /// A single in-memory node.
    pub async fn standalone() -> SharedContext {
        let mut config = StrongboxConfig::default();
        config.store.max_object_bytes = 64 * 1024;
        EngineContext::assemble(
            config,
            EngineParts {
                catalog: Catalog::open_in_memory().unwrap(),
                storage: Arc::new(MemoryStorageProvider::new()),
                audit_sink: Arc::new(MemoryAuditSink::new()),
                crypto: EncryptionManager::ephemeral(),
                transport: Arc::new(InProcessTransport::new()),
            },
        )
        .await
        .unwrap()
    }

    pub fn req() -> RequestContext {
        RequestContext::new("tester", Duration::from_secs(1))
    }
}
