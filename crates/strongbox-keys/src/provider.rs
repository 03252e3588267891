use async_trait::async_trait;
use strongbox_core::types::KeyMaterial;
use zeroize::ZeroizeOnDrop;

/// A 256-bit payload key with metadata.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ManagedKey {
    #[zeroize(skip)]
    pub id: String,
    pub key: [u8; 32],
    #[zeroize(skip)]
    pub created_at: String,
}

impl std::fmt::Debug for ManagedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedKey")
            .field("id", &self.id)
            .field("key", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl From<&ManagedKey> for KeyMaterial {
    fn from(key: &ManagedKey) -> Self {
        KeyMaterial {
            id: key.id.clone(),
            key: key.key,
        }
    }
}

/// Source of payload encryption keys.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Key that new payloads are sealed with.
    async fn get_current_key(&self) -> anyhow::Result<ManagedKey>;

    /// Any key by id, retired ones included.
    async fn get_key_by_id(&self, id: &str) -> anyhow::Result<ManagedKey>;

    /// Generate a new key and make it current. Older keys stay readable.
    async fn rotate_key(&mut self) -> anyhow::Result<ManagedKey>;

    async fn list_key_ids(&self) -> anyhow::Result<Vec<String>>;
}
