use chrono::Utc;
use strongbox_core::audit::AuditEntryType;
use strongbox_core::catalog::Catalog;
use strongbox_core::lock::LockMode;
use strongbox_core::types::{
    Container, ContainerListing, ContainerPath, ContainerSettings, ResourceKey, Tags,
};
use strongbox_core::{Result, StoreError};
use strongbox_replication::Mutation;
use tracing::info;

use crate::context::{Completed, Operation, RequestContext, SharedContext};

/// How Delete treats a container that still holds objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Fail with Conflict.
    #[default]
    Reject,
    /// Remove the objects together with the container.
    Cascade,
}

/// Container-level operations.
#[derive(Clone)]
pub struct ContainerEngine {
    ctx: SharedContext,
}

impl ContainerEngine {
    pub fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }

    /// Immediate object keys and sub-containers.
    pub async fn enumerate(
        &self,
        req: &RequestContext,
        path: &ContainerPath,
    ) -> Result<ContainerListing> {
        let key = ResourceKey::container(path.clone());
        let op =
            Operation::new(AuditEntryType::Enumerate, key.clone()).lock(key, LockMode::Shared);
        self.ctx
            .execute(req, op, async {
                let listing = self.ctx.with_catalog(|catalog| {
                    if !catalog.container_exists(path)? {
                        return Err(not_found(path));
                    }
                    Ok(ContainerListing {
                        path: path.clone(),
                        objects: catalog.list_object_keys(path)?,
                        containers: catalog.child_containers(path)?,
                    })
                })?;
                Ok(Completed::local(listing))
            })
            .await
            .map(|done| done.value)
    }

    pub async fn read(&self, req: &RequestContext, path: &ContainerPath) -> Result<Container> {
        let key = ResourceKey::container(path.clone());
        let op = Operation::new(AuditEntryType::Read, key.clone()).lock(key, LockMode::Shared);
        self.ctx
            .execute(req, op, async {
                let container = self.ctx.with_catalog(|catalog| load(catalog, path))?;
                Ok(Completed::local(container))
            })
            .await
            .map(|done| done.value)
    }

    /// Container metadata if it exists. Audited as Exists.
    pub async fn head(
        &self,
        req: &RequestContext,
        path: &ContainerPath,
    ) -> Result<Option<Container>> {
        let key = ResourceKey::container(path.clone());
        let op = Operation::new(AuditEntryType::Exists, key.clone()).lock(key, LockMode::Shared);
        self.ctx
            .execute(req, op, async {
                let container = self.ctx.with_catalog(|catalog| catalog.get_container(path))?;
                Ok(Completed::local(container))
            })
            .await
            .map(|done| done.value)
    }

    pub async fn exists(&self, req: &RequestContext, path: &ContainerPath) -> Result<bool> {
        Ok(self.head(req, path).await?.is_some())
    }

    /// Create the container, or replace the tags of an existing one.
    ///
    /// A nested container needs its parent to exist; the parent is held
    /// Shared so it cannot be deleted or renamed underneath the call.
    pub async fn write(
        &self,
        req: &RequestContext,
        path: &ContainerPath,
        tags: Tags,
    ) -> Result<Completed<Container>> {
        let key = ResourceKey::container(path.clone());
        let mut op =
            Operation::new(AuditEntryType::Write, key.clone()).lock(key, LockMode::Exclusive);
        if let Some(parent) = path.parent() {
            op = op.lock(ResourceKey::container(parent), LockMode::Shared);
        }

        self.ctx
            .execute(req, op, async {
                let now = Utc::now();
                let (container, created) = self.ctx.with_catalog(|catalog| {
                    if let Some(parent) = path.parent() {
                        if !catalog.container_exists(&parent)? {
                            return Err(StoreError::NotFound(format!("parent container '{parent}'")));
                        }
                    }
                    let created = catalog.upsert_container(path, &tags, &now)?;
                    Ok((load(catalog, path)?, created))
                })?;
                if created {
                    info!(container = %path, actor = %req.actor, "container created");
                }

                let factor = container.settings.replication_factor;
                let outcome = self
                    .ctx
                    .replication
                    .propagate(
                        Mutation::UpsertContainer {
                            container: container.clone(),
                        },
                        factor,
                    )
                    .await;
                Ok(Completed::replicated(container, outcome))
            })
            .await
    }

    /// Move a container and its objects to `to`, atomically.
    ///
    /// `to` must be unused and its parent must exist. Containers that have
    /// sub-containers cannot be renamed.
    pub async fn rename(
        &self,
        req: &RequestContext,
        from: &ContainerPath,
        to: &ContainerPath,
    ) -> Result<Completed<()>> {
        let source = ResourceKey::container(from.clone());
        let target = ResourceKey::container(to.clone());
        let mut op = Operation::new(AuditEntryType::Rename, source.clone())
            .target(target.clone())
            .lock(source, LockMode::Exclusive)
            .lock(target, LockMode::Exclusive);
        if let Some(parent) = to.parent() {
            op = op.lock(ResourceKey::container(parent), LockMode::Shared);
        }

        self.ctx
            .execute(req, op, async {
                if from == to || to.as_str().starts_with(&format!("{from}/")) {
                    return Err(StoreError::Conflict(format!(
                        "cannot rename '{from}' to '{to}'"
                    )));
                }
                let factor = self.ctx.with_catalog(|catalog| {
                    let container = load(catalog, from)?;
                    if !catalog.child_containers(from)?.is_empty() {
                        return Err(StoreError::Conflict(format!(
                            "container '{from}' has sub-containers"
                        )));
                    }
                    if let Some(parent) = to.parent() {
                        if !catalog.container_exists(&parent)? {
                            return Err(StoreError::NotFound(format!("parent container '{parent}'")));
                        }
                    }
                    catalog.rename_container(from, to)?;
                    Ok(container.settings.replication_factor)
                })?;
                info!(from = %from, to = %to, actor = %req.actor, "container renamed");

                let outcome = self
                    .ctx
                    .replication
                    .propagate(
                        Mutation::RenameContainer {
                            from: from.clone(),
                            to: to.clone(),
                        },
                        factor,
                    )
                    .await;
                Ok(Completed::replicated((), outcome))
            })
            .await
    }

    /// Delete a container. Objects block the delete unless `mode` cascades;
    /// sub-containers always do.
    pub async fn delete(
        &self,
        req: &RequestContext,
        path: &ContainerPath,
        mode: DeleteMode,
    ) -> Result<Completed<()>> {
        let key = ResourceKey::container(path.clone());
        let op =
            Operation::new(AuditEntryType::Delete, key.clone()).lock(key, LockMode::Exclusive);

        self.ctx
            .execute(req, op, async {
                let (factor, storage_keys) = self.ctx.with_catalog(|catalog| {
                    let container = load(catalog, path)?;
                    if !catalog.child_containers(path)?.is_empty() {
                        return Err(StoreError::Conflict(format!(
                            "container '{path}' has sub-containers"
                        )));
                    }
                    let storage_keys = match mode {
                        DeleteMode::Reject => {
                            catalog.delete_container(path)?;
                            Vec::new()
                        }
                        DeleteMode::Cascade => catalog.delete_container_cascade(path)?,
                    };
                    Ok((container.settings.replication_factor, storage_keys))
                })?;
                info!(
                    container = %path,
                    objects = storage_keys.len(),
                    actor = %req.actor,
                    "container deleted"
                );
                self.ctx.discard_blobs(&storage_keys).await;

                let outcome = self
                    .ctx
                    .replication
                    .propagate(
                        Mutation::DeleteContainer {
                            path: path.clone(),
                            cascade: mode == DeleteMode::Cascade,
                        },
                        factor,
                    )
                    .await;
                Ok(Completed::replicated((), outcome))
            })
            .await
    }

    /// Replace the container's settings.
    pub async fn configure(
        &self,
        req: &RequestContext,
        path: &ContainerPath,
        settings: ContainerSettings,
    ) -> Result<Completed<Container>> {
        let key = ResourceKey::container(path.clone());
        let op = Operation::new(AuditEntryType::Configuration, key.clone())
            .lock(key, LockMode::Exclusive);

        self.ctx
            .execute(req, op, async {
                let container = self.ctx.with_catalog(|catalog| {
                    if !catalog.set_container_settings(path, &settings)? {
                        return Err(not_found(path));
                    }
                    load(catalog, path)
                })?;
                info!(
                    container = %path,
                    enabled = settings.enabled,
                    replication_factor = ?settings.replication_factor,
                    "container configured"
                );

                let outcome = self
                    .ctx
                    .replication
                    .propagate(
                        Mutation::ConfigureContainer {
                            path: path.clone(),
                            settings: settings.clone(),
                        },
                        settings.replication_factor,
                    )
                    .await;
                Ok(Completed::replicated(container, outcome))
            })
            .await
    }
}

fn not_found(path: &ContainerPath) -> StoreError {
    StoreError::NotFound(format!("container '{path}'"))
}

fn load(catalog: &Catalog, path: &ContainerPath) -> Result<Container> {
    catalog.get_container(path)?.ok_or_else(|| not_found(path))
}
