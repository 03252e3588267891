use chrono::{DateTime, Utc};
use strongbox_core::audit::AuditEntryType;
use strongbox_core::catalog::Catalog;
use strongbox_core::crypto::{content_digest, digest_matches};
use strongbox_core::lock::LockMode;
use strongbox_core::types::{
    Container, ContainerPath, ObjectKey, ObjectRecord, ResourceKey, Tags,
};
use strongbox_core::{Result, StoreError};
use strongbox_replication::Mutation;
use tracing::{debug, error};

use crate::context::{Completed, Operation, RequestContext, SharedContext, storage_error};

/// Object metadata together with (a slice of) its plaintext.
#[derive(Debug, Clone)]
pub struct ObjectData {
    pub record: ObjectRecord,
    pub data: Vec<u8>,
}

/// Object-level operations.
///
/// Every call holds its container Shared, so container delete, rename and
/// configure never interleave with object traffic.
#[derive(Clone)]
pub struct ObjectEngine {
    ctx: SharedContext,
}

impl ObjectEngine {
    pub fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }

    fn operation(
        entry_type: AuditEntryType,
        container: &ContainerPath,
        key: &ObjectKey,
        mode: LockMode,
    ) -> Operation {
        let object = ResourceKey::object(container.clone(), key.clone());
        Operation::new(entry_type, object.clone())
            .lock(ResourceKey::container(container.clone()), LockMode::Shared)
            .lock(object, mode)
    }

    pub async fn read(
        &self,
        req: &RequestContext,
        container: &ContainerPath,
        key: &ObjectKey,
    ) -> Result<ObjectData> {
        let op = Self::operation(AuditEntryType::Read, container, key, LockMode::Shared);
        self.ctx
            .execute(req, op, async {
                let record = self.ctx.with_catalog(|catalog| load(catalog, container, key))?;
                let data = self.open_payload(&record).await?;
                Ok(Completed::local(ObjectData { record, data }))
            })
            .await
            .map(|done| done.value)
    }

    /// Bytes `[offset, offset + length)`. The range must lie within the object.
    pub async fn read_range(
        &self,
        req: &RequestContext,
        container: &ContainerPath,
        key: &ObjectKey,
        offset: u64,
        length: u64,
    ) -> Result<ObjectData> {
        let op = Self::operation(AuditEntryType::ReadRange, container, key, LockMode::Shared);
        self.ctx
            .execute(req, op, async {
                let record = self.ctx.with_catalog(|catalog| load(catalog, container, key))?;
                let end = offset
                    .checked_add(length)
                    .filter(|end| *end <= record.size)
                    .ok_or(StoreError::InvalidRange {
                        offset,
                        length,
                        size: record.size,
                    })?;
                let data = self.open_payload(&record).await?;
                let slice = usize::try_from(offset)
                    .ok()
                    .zip(usize::try_from(end).ok())
                    .and_then(|(start, end)| data.get(start..end))
                    .ok_or(StoreError::InvalidRange {
                        offset,
                        length,
                        size: record.size,
                    })?
                    .to_vec();
                Ok(Completed::local(ObjectData { record, data: slice }))
            })
            .await
            .map(|done| done.value)
    }

    /// Object metadata if it exists. The payload is not touched.
    pub async fn head(
        &self,
        req: &RequestContext,
        container: &ContainerPath,
        key: &ObjectKey,
    ) -> Result<Option<ObjectRecord>> {
        let op = Self::operation(AuditEntryType::Exists, container, key, LockMode::Shared);
        self.ctx
            .execute(req, op, async {
                let record = self
                    .ctx
                    .with_catalog(|catalog| catalog.get_object(container, key))?;
                Ok(Completed::local(record))
            })
            .await
            .map(|done| done.value)
    }

    pub async fn exists(
        &self,
        req: &RequestContext,
        container: &ContainerPath,
        key: &ObjectKey,
    ) -> Result<bool> {
        Ok(self.head(req, container, key).await?.is_some())
    }

    /// Store `data` under `key`, replacing any previous content and tags.
    pub async fn write(
        &self,
        req: &RequestContext,
        container: &ContainerPath,
        key: &ObjectKey,
        data: &[u8],
        tags: Tags,
    ) -> Result<Completed<ObjectRecord>> {
        let op = Self::operation(AuditEntryType::Write, container, key, LockMode::Exclusive);
        self.ctx
            .execute(req, op, async {
                self.check_size(data.len() as u64)?;
                let (parent, existing) = self.ctx.with_catalog(|catalog| {
                    let parent = writable(catalog, container)?;
                    Ok((parent, catalog.get_object(container, key)?))
                })?;
                let created_at = existing.map(|r| r.created_at).unwrap_or_else(Utc::now);
                self.replace_payload(&parent, key, data, tags, created_at)
                    .await
            })
            .await
    }

    /// Overwrite bytes starting at `offset`. Writing past the end extends
    /// the object and zero-fills any gap.
    pub async fn write_range(
        &self,
        req: &RequestContext,
        container: &ContainerPath,
        key: &ObjectKey,
        offset: u64,
        data: &[u8],
    ) -> Result<Completed<ObjectRecord>> {
        let op = Self::operation(
            AuditEntryType::WriteRange,
            container,
            key,
            LockMode::Exclusive,
        );
        self.ctx
            .execute(req, op, async {
                let (parent, record) = self.ctx.with_catalog(|catalog| {
                    let parent = writable(catalog, container)?;
                    Ok((parent, load(catalog, container, key)?))
                })?;

                let limit = self.ctx.max_object_bytes();
                let end = offset
                    .checked_add(data.len() as u64)
                    .ok_or(StoreError::PayloadTooLarge {
                        size: u64::MAX,
                        limit,
                    })?;
                self.check_size(end.max(record.size))?;

                let not_addressable = || StoreError::PayloadTooLarge { size: end, limit };
                let start = usize::try_from(offset).map_err(|_| not_addressable())?;
                let stop = usize::try_from(end).map_err(|_| not_addressable())?;

                let mut content = self.open_payload(&record).await?;
                if content.len() < stop {
                    content.resize(stop, 0);
                }
                content[start..stop].copy_from_slice(data);

                self.replace_payload(&parent, key, &content, record.tags, record.created_at)
                    .await
            })
            .await
    }

    /// Replace the tag set. The payload is untouched.
    pub async fn write_tags(
        &self,
        req: &RequestContext,
        container: &ContainerPath,
        key: &ObjectKey,
        tags: Tags,
    ) -> Result<Completed<ObjectRecord>> {
        let op = Self::operation(
            AuditEntryType::WriteTags,
            container,
            key,
            LockMode::Exclusive,
        );
        self.ctx
            .execute(req, op, async {
                let now = Utc::now();
                let (parent, record) = self.ctx.with_catalog(|catalog| {
                    let parent = writable(catalog, container)?;
                    if !catalog.set_object_tags(container, key, &tags, &now)? {
                        return Err(not_found(container, key));
                    }
                    Ok((parent, load(catalog, container, key)?))
                })?;

                let outcome = self
                    .ctx
                    .replication
                    .propagate(
                        Mutation::SetObjectTags {
                            container: container.clone(),
                            key: key.clone(),
                            tags,
                            modified_at: now,
                        },
                        parent.settings.replication_factor,
                    )
                    .await;
                Ok(Completed::replicated(record, outcome))
            })
            .await
    }

    pub async fn delete(
        &self,
        req: &RequestContext,
        container: &ContainerPath,
        key: &ObjectKey,
    ) -> Result<Completed<()>> {
        let op = Self::operation(AuditEntryType::Delete, container, key, LockMode::Exclusive);
        self.ctx
            .execute(req, op, async {
                let (parent, storage_key) = self.ctx.with_catalog(|catalog| {
                    let parent = writable(catalog, container)?;
                    let storage_key = catalog
                        .delete_object(container, key)?
                        .ok_or_else(|| not_found(container, key))?;
                    Ok((parent, storage_key))
                })?;
                self.ctx.discard_blobs(&[storage_key]).await;

                let outcome = self
                    .ctx
                    .replication
                    .propagate(
                        Mutation::DeleteObject {
                            container: container.clone(),
                            key: key.clone(),
                        },
                        parent.settings.replication_factor,
                    )
                    .await;
                Ok(Completed::replicated((), outcome))
            })
            .await
    }

    fn check_size(&self, size: u64) -> Result<()> {
        let limit = self.ctx.max_object_bytes();
        if size > limit {
            return Err(StoreError::PayloadTooLarge { size, limit });
        }
        Ok(())
    }

    /// Fetch, decrypt and verify an object's payload.
    async fn open_payload(&self, record: &ObjectRecord) -> Result<Vec<u8>> {
        let ciphertext = self
            .ctx
            .storage
            .get_blob(&record.storage_key)
            .await
            .map_err(storage_error)?;
        let plaintext = self.ctx.crypto.open(&ciphertext, &record.encryption)?;
        if !digest_matches(&record.etag, &content_digest(&plaintext)) {
            error!(resource = %record.resource_key(), "payload digest mismatch");
            return Err(StoreError::Decryption(format!(
                "content digest mismatch for '{}'",
                record.resource_key()
            )));
        }
        Ok(plaintext)
    }

    /// Seal `plaintext` into a fresh blob and swap it in for the current one.
    ///
    /// The new blob is written before the catalog points at it and the old
    /// blob is removed only after, so readers never see partial content.
    async fn replace_payload(
        &self,
        parent: &Container,
        key: &ObjectKey,
        plaintext: &[u8],
        tags: Tags,
        created_at: DateTime<Utc>,
    ) -> Result<Completed<ObjectRecord>> {
        let sealed = self.ctx.crypto.seal(plaintext)?;
        let storage_key = strongbox_storage::new_storage_key();
        self.ctx
            .storage
            .put_blob(&storage_key, &sealed.ciphertext)
            .await
            .map_err(storage_error)?;

        let record = ObjectRecord {
            container: parent.path.clone(),
            key: key.clone(),
            size: plaintext.len() as u64,
            etag: content_digest(plaintext),
            tags,
            created_at,
            modified_at: Utc::now(),
            encryption: sealed.info,
            storage_key,
        };
        let superseded = match self.ctx.with_catalog(|catalog| catalog.put_object(&record)) {
            Ok(superseded) => superseded,
            Err(e) => {
                self.ctx.discard_blobs(&[record.storage_key.clone()]).await;
                return Err(e);
            }
        };
        if let Some(old) = superseded {
            self.ctx.discard_blobs(&[old]).await;
        }
        debug!(
            resource = %record.resource_key(),
            size = record.size,
            key_id = %record.encryption.key_id,
            "payload stored"
        );

        let outcome = self
            .ctx
            .replication
            .propagate(
                Mutation::PutObject {
                    record: record.clone(),
                    ciphertext: sealed.ciphertext,
                },
                parent.settings.replication_factor,
            )
            .await;
        Ok(Completed::replicated(record, outcome))
    }
}

fn not_found(container: &ContainerPath, key: &ObjectKey) -> StoreError {
    StoreError::NotFound(format!("object '{container}:{key}'"))
}

fn load(catalog: &Catalog, container: &ContainerPath, key: &ObjectKey) -> Result<ObjectRecord> {
    catalog
        .get_object(container, key)?
        .ok_or_else(|| not_found(container, key))
}

/// The container, if it exists and accepts object mutations.
fn writable(catalog: &Catalog, container: &ContainerPath) -> Result<Container> {
    let parent = catalog
        .get_container(container)?
        .ok_or_else(|| StoreError::NotFound(format!("container '{container}'")))?;
    if !parent.is_enabled() {
        return Err(StoreError::ContainerDisabled(container.to_string()));
    }
    Ok(parent)
}
