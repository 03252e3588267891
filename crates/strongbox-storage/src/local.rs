use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::provider::StorageProvider;

/// Filesystem-backed blob store rooted at `base_path`.
pub struct LocalStorageProvider {
    base_path: PathBuf,
    name: String,
}

impl LocalStorageProvider {
    pub fn new(base_path: &Path, name: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)?;
        debug!(provider = name, path = %base_path.display(), "local storage ready");
        Ok(Self {
            base_path: base_path.to_path_buf(),
            name: name.to_string(),
        })
    }

    /// Keys are relative paths under the base directory.
    fn blob_path(&self, key: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            warn!(provider = %self.name, key, "rejected blob key outside the base path");
            anyhow::bail!("invalid blob key: {key}");
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    async fn put_blob(&self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        let path = self.blob_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("partial");
        let written = match tokio::fs::write(&tmp, data).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // A half-written blob must not outlive the failed put.
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        provider = %self.name,
                        key,
                        error = %cleanup,
                        "failed to remove partial blob"
                    );
                }
            }
            return Err(e.into());
        }
        debug!(provider = %self.name, key, bytes = data.len(), "blob stored");
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.blob_path(key)?;
        Ok(tokio::fs::read(&path).await?)
    }

    async fn delete_blob(&self, key: &str) -> anyhow::Result<()> {
        let path = self.blob_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(provider = %self.name, key, "blob deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn blob_exists(&self, key: &str) -> anyhow::Result<bool> {
        let path = self.blob_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn test_connection(&self) -> anyhow::Result<()> {
        if !self.base_path.exists() {
            anyhow::bail!("Base path does not exist: {}", self.base_path.display());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalStorageProvider::new(tmp.path(), "test-local").unwrap();

        let data = b"sealed payload bytes";
        let key = crate::new_storage_key();

        provider.put_blob(&key, data).await.unwrap();
        assert!(provider.blob_exists(&key).await.unwrap());
        assert_eq!(provider.get_blob(&key).await.unwrap(), data);

        provider.delete_blob(&key).await.unwrap();
        assert!(!provider.blob_exists(&key).await.unwrap());
        provider.delete_blob(&key).await.unwrap();
    }

    #[tokio::test]
    async fn overwrite_replaces_whole_blob() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalStorageProvider::new(tmp.path(), "test-local").unwrap();

        provider.put_blob("objects/aa/bb/x", b"a much longer first version").await.unwrap();
        provider.put_blob("objects/aa/bb/x", b"short").await.unwrap();
        assert_eq!(provider.get_blob("objects/aa/bb/x").await.unwrap(), b"short");
        assert!(!tmp.path().join("objects/aa/bb/x.partial").exists());
    }

    #[tokio::test]
    async fn failed_put_leaves_no_partial_blob() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalStorageProvider::new(tmp.path(), "test-local").unwrap();

        // The target is a non-empty directory, so the final rename fails.
        std::fs::create_dir_all(tmp.path().join("objects/aa/bb/x/child")).unwrap();
        assert!(provider.put_blob("objects/aa/bb/x", b"payload").await.is_err());
        assert!(!tmp.path().join("objects/aa/bb/x.partial").exists());
        assert!(tmp.path().join("objects/aa/bb/x/child").is_dir());
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalStorageProvider::new(tmp.path(), "test-local").unwrap();
        assert!(provider.put_blob("../outside", b"x").await.is_err());
        assert!(provider.put_blob("/etc/passwd", b"x").await.is_err());
        assert!(provider.get_blob("").await.is_err());
    }

    #[tokio::test]
    async fn test_connection_ok() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalStorageProvider::new(tmp.path(), "test-local").unwrap();
        provider.test_connection().await.unwrap();
    }
}
