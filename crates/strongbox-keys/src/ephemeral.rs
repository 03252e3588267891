use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::provider::{KeyProvider, ManagedKey};

/// Keys held only in process memory. Payloads sealed with them do not
/// survive a restart; meant for tests and throwaway nodes.
#[derive(Debug)]
pub struct EphemeralKeyProvider {
    keys: Vec<ManagedKey>,
}

impl EphemeralKeyProvider {
    pub fn new() -> Self {
        Self {
            keys: vec![generate()],
        }
    }
}

impl Default for EphemeralKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn generate() -> ManagedKey {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    ManagedKey {
        id: Uuid::now_v7().to_string(),
        key,
        created_at: chrono::Utc::now().to_rfc3339(),
    }
}

#[async_trait]
impl KeyProvider for EphemeralKeyProvider {
    async fn get_current_key(&self) -> anyhow::Result<ManagedKey> {
        self.keys
            .last()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("ephemeral keyring is empty"))
    }

    async fn get_key_by_id(&self, id: &str) -> anyhow::Result<ManagedKey> {
        self.keys
            .iter()
            .find(|k| k.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Key {id} not found"))
    }

    async fn rotate_key(&mut self) -> anyhow::Result<ManagedKey> {
        let key = generate();
        self.keys.push(key.clone());
        Ok(key)
    }

    async fn list_key_ids(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.keys.iter().map(|k| k.id.clone()).collect())
    }
}
