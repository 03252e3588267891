use async_trait::async_trait;
use strongbox_core::lock::LockMode;
use strongbox_core::types::ResourceKey;
use strongbox_core::{Result, StoreError};
use strongbox_replication::{Mutation, ReplicaHandler, ReplicatedMutation};
use tracing::{debug, warn};

use crate::context::{SharedContext, storage_error};

/// Applies mutations propagated by the primary to this node's store.
///
/// Takes the same locks a local call would, but is not blocked by
/// maintenance, records no audit entry and never propagates further.
/// Payloads arrive sealed and are stored under a locally chosen key.
///
/// Deliveries may arrive out of order. A mutation whose sequence is older
/// than one already applied to the same resource is refused with
/// `Conflict`, so the primary counts it as a failed delivery.
#[derive(Clone)]
pub struct ReplicaApplier {
    ctx: SharedContext,
}

impl ReplicaApplier {
    pub fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }

    pub async fn apply_mutation(&self, mutation: ReplicatedMutation) -> Result<()> {
        let holder = format!("replica:{}", mutation.origin);
        let plan = lock_plan(&mutation.op);
        let guarded: Vec<ResourceKey> = plan
            .iter()
            .filter(|(_, mode)| *mode == LockMode::Exclusive)
            .map(|(key, _)| key.clone())
            .collect();
        let _locks = self
            .ctx
            .locks
            .acquire_all(plan, &holder, self.ctx.config.store.lock_timeout())
            .await?;

        let name = mutation.op.name();
        let resource = mutation.op.resource();
        let sequence = mutation.sequence;

        let newest = self.ctx.with_catalog(|c| {
            let mut newest = None;
            for key in &guarded {
                newest = newest.max(c.applied_sequence(key)?);
            }
            Ok(newest)
        })?;
        if let Some(newest) = newest {
            if sequence == newest {
                debug!(mutation = %mutation.id, sequence, "replicated mutation already applied");
                return Ok(());
            }
            if sequence < newest {
                warn!(
                    mutation = %mutation.id,
                    op = name,
                    resource = %resource,
                    sequence,
                    newest,
                    "refusing stale replicated mutation"
                );
                return Err(StoreError::Conflict(format!(
                    "stale {name} on '{resource}': sequence {sequence} is older than {newest}"
                )));
            }
        }

        match mutation.op {
            Mutation::UpsertContainer { container } => {
                self.ctx.with_catalog(|c| c.put_container(&container))?;
            }
            Mutation::ConfigureContainer { path, settings } => {
                let found = self
                    .ctx
                    .with_catalog(|c| c.set_container_settings(&path, &settings))?;
                if !found {
                    return Err(StoreError::NotFound(format!("container '{path}'")));
                }
            }
            Mutation::DeleteContainer { path, cascade } => {
                let storage_keys = self.ctx.with_catalog(|c| {
                    if cascade {
                        c.delete_container_cascade(&path)
                    } else {
                        c.delete_container(&path).map(|_| Vec::new())
                    }
                })?;
                self.ctx.discard_blobs(&storage_keys).await;
            }
            Mutation::RenameContainer { from, to } => {
                self.ctx.with_catalog(|c| c.rename_container(&from, &to))?;
            }
            Mutation::PutObject {
                mut record,
                ciphertext,
            } => {
                record.storage_key = strongbox_storage::new_storage_key();
                self.ctx
                    .storage
                    .put_blob(&record.storage_key, &ciphertext)
                    .await
                    .map_err(storage_error)?;
                match self.ctx.with_catalog(|c| c.put_object(&record)) {
                    Ok(Some(old)) => self.ctx.discard_blobs(&[old]).await,
                    Ok(None) => {}
                    Err(e) => {
                        self.ctx.discard_blobs(&[record.storage_key.clone()]).await;
                        return Err(e);
                    }
                }
            }
            Mutation::SetObjectTags {
                container,
                key,
                tags,
                modified_at,
            } => {
                let found = self.ctx.with_catalog(|c| {
                    c.set_object_tags(&container, &key, &tags, &modified_at)
                })?;
                if !found {
                    return Err(StoreError::NotFound(format!("object '{container}:{key}'")));
                }
            }
            Mutation::DeleteObject { container, key } => {
                // Already gone is fine: the primary's view wins.
                let storage_key = self
                    .ctx
                    .with_catalog(|c| c.delete_object(&container, &key))?;
                if let Some(storage_key) = storage_key {
                    self.ctx.discard_blobs(&[storage_key]).await;
                }
            }
        }

        self.ctx.with_catalog(|c| {
            for key in &guarded {
                c.record_applied_sequence(key, sequence)?;
            }
            Ok(())
        })?;

        debug!(
            mutation = %mutation.id,
            origin = mutation.origin,
            sequence,
            op = name,
            resource = %resource,
            "replicated mutation applied"
        );
        Ok(())
    }
}

#[async_trait]
impl ReplicaHandler for ReplicaApplier {
    async fn apply(&self, mutation: ReplicatedMutation) -> anyhow::Result<()> {
        Ok(self.apply_mutation(mutation).await?)
    }
}

/// Locks matching what the originating engine call held.
fn lock_plan(op: &Mutation) -> Vec<(ResourceKey, LockMode)> {
    match op {
        Mutation::UpsertContainer { .. }
        | Mutation::ConfigureContainer { .. }
        | Mutation::DeleteContainer { .. } => vec![(op.resource(), LockMode::Exclusive)],
        Mutation::RenameContainer { from, to } => vec![
            (ResourceKey::container(from.clone()), LockMode::Exclusive),
            (ResourceKey::container(to.clone()), LockMode::Exclusive),
        ],
        Mutation::PutObject { .. }
        | Mutation::SetObjectTags { .. }
        | Mutation::DeleteObject { .. } => {
            let object = op.resource();
            let container = ResourceKey::container(object.container_path().clone());
            vec![(container, LockMode::Shared), (object, LockMode::Exclusive)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::standalone;
    use chrono::Utc;
    use strongbox_core::types::{Container, ContainerPath, ContainerSettings, ObjectKey, Tags};

    fn container(path: &str) -> Container {
        Container {
            path: ContainerPath::parse(path).unwrap(),
            created_at: Utc::now(),
            tags: Tags::new(),
            settings: ContainerSettings::default(),
        }
    }

    #[tokio::test]
    async fn applies_sealed_payload_under_local_storage_key() {
        let ctx = standalone().await;
        let applier = ReplicaApplier::new(ctx.clone());
        applier
            .apply_mutation(ReplicatedMutation::new(
                1,
                1,
                Mutation::UpsertContainer {
                    container: container("c1"),
                },
            ))
            .await
            .unwrap();

        let sealed = ctx.crypto.seal(b"payload").unwrap();
        let now = Utc::now();
        let record = strongbox_core::types::ObjectRecord {
            container: ContainerPath::parse("c1").unwrap(),
            key: ObjectKey::parse("k1").unwrap(),
            size: 7,
            etag: strongbox_core::crypto::content_digest(b"payload"),
            tags: Tags::new(),
            created_at: now,
            modified_at: now,
            encryption: sealed.info,
            storage_key: "objects/../../escape".into(),
        };
        applier
            .apply_mutation(ReplicatedMutation::new(
                1,
                2,
                Mutation::PutObject {
                    record,
                    ciphertext: sealed.ciphertext,
                },
            ))
            .await
            .unwrap();

        let c1 = ContainerPath::parse("c1").unwrap();
        let k1 = ObjectKey::parse("k1").unwrap();
        let stored = ctx
            .with_catalog(|c| c.get_object(&c1, &k1))
            .unwrap()
            .unwrap();
        assert!(stored.storage_key.starts_with("objects/"));
        assert!(!stored.storage_key.contains(".."));
        let blob = ctx.storage.get_blob(&stored.storage_key).await.unwrap();
        assert_eq!(ctx.crypto.open(&blob, &stored.encryption).unwrap(), b"payload");
    }

    fn put(sequence: u64, ctx: &SharedContext, payload: &[u8]) -> ReplicatedMutation {
        let sealed = ctx.crypto.seal(payload).unwrap();
        let now = Utc::now();
        ReplicatedMutation::new(
            1,
            sequence,
            Mutation::PutObject {
                record: strongbox_core::types::ObjectRecord {
                    container: ContainerPath::parse("c1").unwrap(),
                    key: ObjectKey::parse("k1").unwrap(),
                    size: payload.len() as u64,
                    etag: strongbox_core::crypto::content_digest(payload),
                    tags: Tags::new(),
                    created_at: now,
                    modified_at: now,
                    encryption: sealed.info,
                    storage_key: String::new(),
                },
                ciphertext: sealed.ciphertext,
            },
        )
    }

    async fn stored_payload(ctx: &SharedContext) -> Option<Vec<u8>> {
        let c1 = ContainerPath::parse("c1").unwrap();
        let k1 = ObjectKey::parse("k1").unwrap();
        let record = ctx.with_catalog(|c| c.get_object(&c1, &k1)).unwrap()?;
        let blob = ctx.storage.get_blob(&record.storage_key).await.unwrap();
        Some(ctx.crypto.open(&blob, &record.encryption).unwrap())
    }

    #[tokio::test]
    async fn late_delivery_does_not_overwrite_newer_state() {
        let ctx = standalone().await;
        let applier = ReplicaApplier::new(ctx.clone());
        applier
            .apply_mutation(ReplicatedMutation::new(
                1,
                1,
                Mutation::UpsertContainer {
                    container: container("c1"),
                },
            ))
            .await
            .unwrap();

        let older = put(10, &ctx, b"v1");
        let newer = put(20, &ctx, b"v2");
        applier.apply_mutation(newer).await.unwrap();
        let err = applier.apply_mutation(older).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(stored_payload(&ctx).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn late_write_cannot_resurrect_a_deleted_object() {
        let ctx = standalone().await;
        let applier = ReplicaApplier::new(ctx.clone());
        applier
            .apply_mutation(ReplicatedMutation::new(
                1,
                1,
                Mutation::UpsertContainer {
                    container: container("c1"),
                },
            ))
            .await
            .unwrap();

        let write = put(10, &ctx, b"v1");
        applier
            .apply_mutation(ReplicatedMutation::new(
                1,
                20,
                Mutation::DeleteObject {
                    container: ContainerPath::parse("c1").unwrap(),
                    key: ObjectKey::parse("k1").unwrap(),
                },
            ))
            .await
            .unwrap();
        assert!(applier.apply_mutation(write).await.is_err());
        assert_eq!(stored_payload(&ctx).await, None);
    }

    #[tokio::test]
    async fn redelivery_is_a_no_op() {
        let ctx = standalone().await;
        let applier = ReplicaApplier::new(ctx.clone());
        applier
            .apply_mutation(ReplicatedMutation::new(
                1,
                1,
                Mutation::UpsertContainer {
                    container: container("c1"),
                },
            ))
            .await
            .unwrap();

        let write = put(10, &ctx, b"v1");
        applier.apply_mutation(write.clone()).await.unwrap();
        applier.apply_mutation(write).await.unwrap();
        assert_eq!(stored_payload(&ctx).await.unwrap(), b"v1");
    }

    #[tokio::test]
    async fn ignores_maintenance_and_writes_no_audit() {
        let ctx = standalone().await;
        ctx.maintenance.enter();
        let applier = ReplicaApplier::new(ctx.clone());
        applier
            .apply_mutation(ReplicatedMutation::new(
                1,
                3,
                Mutation::UpsertContainer {
                    container: container("c1"),
                },
            ))
            .await
            .unwrap();
        ctx.audit.flush().await;

        assert!(
            ctx.with_catalog(|c| c.container_exists(&ContainerPath::parse("c1").unwrap()))
                .unwrap()
        );
        assert_eq!(ctx.audit.stats().recorded, 0);
    }

    #[tokio::test]
    async fn delete_of_missing_object_is_accepted() {
        let ctx = standalone().await;
        let applier = ReplicaApplier::new(ctx);
        applier
            .apply_mutation(ReplicatedMutation::new(
                1,
                4,
                Mutation::DeleteObject {
                    container: ContainerPath::parse("c1").unwrap(),
                    key: ObjectKey::parse("k1").unwrap(),
                },
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn configure_of_unknown_container_fails() {
        let ctx = standalone().await;
        let applier = ReplicaApplier::new(ctx);
        let err = applier
            .apply(ReplicatedMutation::new(
                1,
                5,
                Mutation::ConfigureContainer {
                    path: ContainerPath::parse("c1").unwrap(),
                    settings: ContainerSettings::default(),
                },
            ))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("c1"));
    }
}
