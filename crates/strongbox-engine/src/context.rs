use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use strongbox_core::audit::{
    AuditEntryType, AuditLogEntry, AuditLogger, AuditOutcome, AuditSink, SqliteAuditSink,
};
use strongbox_core::catalog::Catalog;
use strongbox_core::config::StrongboxConfig;
use strongbox_core::crypto::EncryptionManager;
use strongbox_core::lock::{LockManager, LockMode, LockSet};
use strongbox_core::maintenance::MaintenanceGate;
use strongbox_core::types::ResourceKey;
use strongbox_core::{ErrorKind, ErrorResponse, Result, StoreError};
use strongbox_replication::{
    ReplicaTransport, ReplicationCoordinator, ReplicationOutcome, Topology,
};
use strongbox_storage::{LocalStorageProvider, StorageProvider};
use tracing::{info, warn};
use uuid::Uuid;

/// Everything an engine operation needs, built once at startup.
pub struct EngineContext {
    pub config: StrongboxConfig,
    pub locks: LockManager,
    pub maintenance: MaintenanceGate,
    pub audit: AuditLogger,
    pub replication: ReplicationCoordinator,
    pub crypto: EncryptionManager,
    pub catalog: Mutex<Catalog>,
    pub storage: Arc<dyn StorageProvider>,
}

pub type SharedContext = Arc<EngineContext>;

/// Collaborators that differ between a disk-backed node and a test fixture.
pub struct EngineParts {
    pub catalog: Catalog,
    pub storage: Arc<dyn StorageProvider>,
    pub audit_sink: Arc<dyn AuditSink>,
    pub crypto: EncryptionManager,
    pub transport: Arc<dyn ReplicaTransport>,
}

impl EngineContext {
    pub async fn assemble(config: StrongboxConfig, parts: EngineParts) -> Result<SharedContext> {
        let audit = AuditLogger::start(parts.audit_sink, &config.audit).await?;
        let topology = Arc::new(Topology::from_config(&config));
        let replication = ReplicationCoordinator::new(
            topology,
            parts.transport,
            config.replication.replica_timeout(),
        );
        Ok(Arc::new(Self {
            locks: LockManager::new(),
            maintenance: MaintenanceGate::new(),
            audit,
            replication,
            crypto: parts.crypto,
            catalog: Mutex::new(parts.catalog),
            storage: parts.storage,
            config,
        }))
    }

    /// Open the catalog, payload directory and audit database named by `config`.
    pub async fn open(
        config: StrongboxConfig,
        crypto: EncryptionManager,
        transport: Arc<dyn ReplicaTransport>,
    ) -> Result<SharedContext> {
        let catalog = Catalog::open(Path::new(&config.store.db_path))?;
        let storage = LocalStorageProvider::new(Path::new(&config.store.data_dir), "local")
            .map_err(storage_error)?;
        let audit_sink = SqliteAuditSink::open(Path::new(config.audit_db_path()))?;
        info!(
            node = config.replication.node_id,
            db = %config.store.db_path,
            data_dir = %config.store.data_dir,
            key_id = %crypto.current_key_id(),
            "engine opened"
        );
        Self::assemble(
            config,
            EngineParts {
                catalog,
                storage: Arc::new(storage),
                audit_sink: Arc::new(audit_sink),
                crypto,
                transport,
            },
        )
        .await
    }

    /// Run `f` against the catalog. Never hold the guard across an await.
    pub(crate) fn with_catalog<T>(&self, f: impl FnOnce(&Catalog) -> Result<T>) -> Result<T> {
        let catalog = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        f(&catalog)
    }

    pub(crate) fn max_object_bytes(&self) -> u64 {
        self.config.store.max_object_bytes
    }

    /// Remove payloads the catalog no longer references. A leftover blob is
    /// garbage, not corruption, so failures are only logged.
    pub(crate) async fn discard_blobs(&self, storage_keys: &[String]) {
        for key in storage_keys {
            if let Err(e) = self.storage.delete_blob(key).await {
                warn!(storage_key = %key, provider = self.storage.name(), error = %e, "failed to delete payload");
            }
        }
    }

    /// Locking, maintenance and audit protocol shared by every engine call.
    ///
    /// Mutations are rejected by the maintenance gate both before waiting
    /// for locks and once they are held. The audit entry is recorded while
    /// the locks are still held; they are released on every exit path.
    pub(crate) async fn execute<T, Fut>(
        &self,
        req: &RequestContext,
        op: Operation,
        body: Fut,
    ) -> Result<Completed<T>>
    where
        Fut: Future<Output = Result<Completed<T>>>,
    {
        let started = Instant::now();
        let result = self.run_locked(req, &op, body).await;

        let (result, _locks) = match result {
            Ok((completed, locks)) => (Ok(completed), Some(locks)),
            Err(e) => (Err(e), None),
        };

        let outcome = match &result {
            Ok(completed) => AuditOutcome::Success {
                degraded: completed
                    .replication
                    .as_ref()
                    .filter(|r| r.is_degraded())
                    .map(ReplicationOutcome::summary),
            },
            Err(e) => AuditOutcome::Failure {
                reason: e.to_string(),
            },
        };
        let mut entry = AuditLogEntry::new(
            op.entry_type,
            op.resource.to_string(),
            req.actor.clone(),
            outcome,
            started.elapsed(),
        );
        if let Some(target) = &op.target {
            entry = entry.with_target(target.to_string());
        }
        self.audit.record(entry);

        match &result {
            Ok(_) if op.entry_type.is_mutation() => info!(
                op = %op.entry_type,
                resource = %op.resource,
                actor = %req.actor,
                request = %req.request_id,
                "mutation committed"
            ),
            Ok(_) => {}
            Err(e) => warn!(
                op = %op.entry_type,
                resource = %op.resource,
                actor = %req.actor,
                request = %req.request_id,
                error = %e,
                "operation failed"
            ),
        }
        result
    }

    async fn run_locked<T, Fut>(
        &self,
        req: &RequestContext,
        op: &Operation,
        body: Fut,
    ) -> Result<(Completed<T>, LockSet)>
    where
        Fut: Future<Output = Result<Completed<T>>>,
    {
        let mutating = op.entry_type.is_mutation();
        if mutating {
            self.maintenance.check()?;
        }
        let locks = self
            .locks
            .acquire_all(op.locks.iter().cloned(), &req.actor, req.lock_timeout)
            .await?;
        if mutating {
            self.maintenance.check()?;
        }
        let completed = body.await?;
        Ok((completed, locks))
    }
}

/// What an engine call does, for locking and auditing.
pub(crate) struct Operation {
    pub entry_type: AuditEntryType,
    pub resource: ResourceKey,
    pub target: Option<ResourceKey>,
    pub locks: Vec<(ResourceKey, LockMode)>,
}

impl Operation {
    pub fn new(entry_type: AuditEntryType, resource: ResourceKey) -> Self {
        Self {
            entry_type,
            resource,
            target: None,
            locks: Vec::new(),
        }
    }

    pub fn target(mut self, target: ResourceKey) -> Self {
        self.target = Some(target);
        self
    }

    pub fn lock(mut self, key: ResourceKey, mode: LockMode) -> Self {
        self.locks.push((key, mode));
        self
    }
}

/// Per-call context built by the transport layer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub actor: String,
    pub lock_timeout: Duration,
    pub request_id: Uuid,
}

impl RequestContext {
    pub fn new(actor: impl Into<String>, lock_timeout: Duration) -> Self {
        Self {
            actor: actor.into(),
            lock_timeout,
            request_id: Uuid::now_v7(),
        }
    }

    /// Context for work the node does on its own behalf.
    pub fn system(lock_timeout: Duration) -> Self {
        Self::new("system", lock_timeout)
    }
}

/// Result of a successful call, with the replication outcome for mutations.
#[derive(Debug, Clone)]
pub struct Completed<T> {
    pub value: T,
    pub replication: Option<ReplicationOutcome>,
}

impl<T> Completed<T> {
    pub(crate) fn local(value: T) -> Self {
        Self {
            value,
            replication: None,
        }
    }

    pub(crate) fn replicated(value: T, outcome: ReplicationOutcome) -> Self {
        Self {
            value,
            replication: Some(outcome),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.replication
            .as_ref()
            .is_some_and(ReplicationOutcome::is_degraded)
    }

    /// ReplicationDegraded annotation for a committed but under-replicated mutation.
    pub fn warning(&self) -> Option<ErrorResponse> {
        let outcome = self.replication.as_ref().filter(|r| r.is_degraded())?;
        let data = serde_json::to_value(outcome).unwrap_or_default();
        Some(
            ErrorResponse::new(
                ErrorKind::ReplicationDegraded,
                format!("replication degraded: {}", outcome.summary()),
            )
            .with_data(data),
        )
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Completed<U> {
        Completed {
            value: f(self.value),
            replication: self.replication,
        }
    }
}

pub(crate) fn storage_error(e: anyhow::Error) -> StoreError {
    StoreError::Storage(format!("{e:#}"))
}
