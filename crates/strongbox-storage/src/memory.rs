use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::provider::StorageProvider;

/// Blobs held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorageProvider {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flip one byte of a stored blob.
    pub fn corrupt(&self, key: &str) -> bool {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        match blobs.get_mut(key).and_then(|b| b.first_mut()) {
            Some(byte) => {
                *byte ^= 0xff;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    async fn put_blob(&self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("blob {key} not found"))
    }

    async fn delete_blob(&self, key: &str) -> anyhow::Result<()> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    async fn blob_exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key))
    }

    async fn test_connection(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let provider = MemoryStorageProvider::new();
        provider.put_blob("a", b"sealed").await.unwrap();
        assert_eq!(provider.get_blob("a").await.unwrap(), b"sealed");
        assert!(provider.corrupt("a"));
        assert_ne!(provider.get_blob("a").await.unwrap(), b"sealed");

        provider.delete_blob("a").await.unwrap();
        provider.delete_blob("a").await.unwrap();
        assert!(provider.get_blob("a").await.is_err());
        assert!(provider.is_empty());
    }
}
