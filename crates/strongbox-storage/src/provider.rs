use async_trait::async_trait;

/// Backing medium for sealed object payloads.
///
/// Blobs are opaque ciphertext; the provider never sees plaintext.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Store a blob. Must be all-or-nothing: a reader never sees a partial blob.
    async fn put_blob(&self, key: &str, data: &[u8]) -> anyhow::Result<()>;

    async fn get_blob(&self, key: &str) -> anyhow::Result<Vec<u8>>;

    /// Delete a blob. Deleting a missing blob is not an error.
    async fn delete_blob(&self, key: &str) -> anyhow::Result<()>;

    async fn blob_exists(&self, key: &str) -> anyhow::Result<bool>;

    /// Test connectivity.
    async fn test_connection(&self) -> anyhow::Result<()>;

    /// Provider name for display.
    fn name(&self) -> &str;
}
