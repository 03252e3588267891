use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::provider::{KeyProvider, ManagedKey};

const KEYSTORE_VERSION: u32 = 1;
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Passphrase-protected keyfile on local disk.
///
/// The passphrase is stretched with Argon2id into a master key that seals
/// the whole keystore with AES-256-GCM. Payload keys are random 256-bit
/// keys stored inside the keystore; rotation appends a new one.
///
/// File layout: `salt (32) || nonce (12) || AES-GCM(keystore JSON)`.
pub struct LocalKeyProvider {
    keyfile_path: PathBuf,
    master_key: [u8; 32],
    keystore: KeyStore,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyStore {
    version: u32,
    salt: [u8; SALT_LEN],
    current_key_id: String,
    keys: Vec<StoredKey>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredKey {
    id: String,
    #[serde(with = "base64_key")]
    key: [u8; 32],
    created_at: String,
}

mod base64_key {
    use super::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        use serde::de::Error;
        let encoded = String::deserialize(d)?;
        let bytes = STANDARD.decode(encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| {
                D::Error::custom(format!("expected 32 key bytes, got {}", b.len()))
            })
    }
}

impl LocalKeyProvider {
    fn derive_master_key(passphrase: &[u8], salt: &[u8; SALT_LEN]) -> anyhow::Result<[u8; 32]> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase, salt, &mut key)
            .map_err(|e| anyhow::anyhow!("Argon2id key derivation failed: {e}"))?;
        Ok(key)
    }

    fn encrypt_keystore(keystore: &KeyStore, master_key: &[u8; 32]) -> anyhow::Result<Vec<u8>> {
        let mut plaintext = serde_json::to_vec(keystore)?;
        let cipher = Aes256Gcm::new_from_slice(master_key)
            .map_err(|e| anyhow::anyhow!("Invalid master key: {e}"))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|e| anyhow::anyhow!("Keystore encryption failed: {e}"))?;
        plaintext.zeroize();

        let mut output = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        output.extend_from_slice(&keystore.salt);
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    fn decrypt_keystore(data: &[u8], passphrase: &[u8]) -> anyhow::Result<(KeyStore, [u8; 32])> {
        if data.len() < SALT_LEN + NONCE_LEN {
            anyhow::bail!("Keyfile too short");
        }

        let salt: [u8; SALT_LEN] = data[..SALT_LEN].try_into()?;
        let nonce_bytes = &data[SALT_LEN..SALT_LEN + NONCE_LEN];
        let ciphertext = &data[SALT_LEN + NONCE_LEN..];

        let master_key = Self::derive_master_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&master_key)
            .map_err(|e| anyhow::anyhow!("Invalid master key: {e}"))?;

        let mut plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("Wrong passphrase or corrupted keyfile"))?;

        let keystore: KeyStore = serde_json::from_slice(&plaintext)?;
        plaintext.zeroize();
        if keystore.version != KEYSTORE_VERSION {
            anyhow::bail!("Unsupported keystore version {}", keystore.version);
        }
        Ok((keystore, master_key))
    }

    /// Write the keystore to a temp file, then rename it over the keyfile.
    fn save(&self) -> anyhow::Result<()> {
        let data = Self::encrypt_keystore(&self.keystore, &self.master_key)?;
        if let Some(parent) = self.keyfile_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.keyfile_path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.keyfile_path)?;
        Ok(())
    }

    fn generate_key() -> StoredKey {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        StoredKey {
            id: Uuid::now_v7().to_string(),
            key,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Create a fresh keyfile holding one payload key.
    pub fn create(keyfile_path: &Path, passphrase: &[u8]) -> anyhow::Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let master_key = Self::derive_master_key(passphrase, &salt)?;

        let first = Self::generate_key();
        let provider = Self {
            keyfile_path: keyfile_path.to_path_buf(),
            master_key,
            keystore: KeyStore {
                version: KEYSTORE_VERSION,
                salt,
                current_key_id: first.id.clone(),
                keys: vec![first],
            },
        };
        provider.save()?;
        tracing::info!(path = %keyfile_path.display(), "created keyfile");
        Ok(provider)
    }

    /// Open an existing keyfile.
    pub fn open(keyfile_path: &Path, passphrase: &[u8]) -> anyhow::Result<Self> {
        let data = std::fs::read(keyfile_path)?;
        let (keystore, master_key) = Self::decrypt_keystore(&data, passphrase)?;
        Ok(Self {
            keyfile_path: keyfile_path.to_path_buf(),
            master_key,
            keystore,
        })
    }

    fn managed(stored: &StoredKey) -> ManagedKey {
        ManagedKey {
            id: stored.id.clone(),
            key: stored.key,
            created_at: stored.created_at.clone(),
        }
    }
}

impl Drop for LocalKeyProvider {
    fn drop(&mut self) {
        self.master_key.zeroize();
        for key in &mut self.keystore.keys {
            key.key.zeroize();
        }
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    async fn get_current_key(&self) -> anyhow::Result<ManagedKey> {
        self.keystore
            .keys
            .iter()
            .find(|k| k.id == self.keystore.current_key_id)
            .map(Self::managed)
            .ok_or_else(|| anyhow::anyhow!("Current key not found in keystore"))
    }

    async fn get_key_by_id(&self, id: &str) -> anyhow::Result<ManagedKey> {
        self.keystore
            .keys
            .iter()
            .find(|k| k.id == id)
            .map(Self::managed)
            .ok_or_else(|| anyhow::anyhow!("Key {id} not found"))
    }

    async fn rotate_key(&mut self) -> anyhow::Result<ManagedKey> {
        let stored = Self::generate_key();
        let managed = Self::managed(&stored);
        self.keystore.current_key_id = stored.id.clone();
        self.keystore.keys.push(stored);
        self.save()?;
        tracing::info!(key_id = %managed.id, "rotated payload key");
        Ok(managed)
    }

    async fn list_key_ids(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.keystore.keys.iter().map(|k| k.id.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use tempfile::TempDir;

    #[tokio::test]
    async fn create_and_open_keyfile() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.enc");
        let passphrase = b"test-passphrase-123";

        let provider = LocalKeyProvider::create(&path, passphrase).unwrap();
        let key1 = provider.get_current_key().await.unwrap();
        assert_eq!(provider.keystore.version, KEYSTORE_VERSION);

        let provider2 = LocalKeyProvider::open(&path, passphrase).unwrap();
        let key2 = provider2.get_current_key().await.unwrap();
        assert_eq!(key1.id, key2.id);
        assert_eq!(key1.key, key2.key);
    }

    #[tokio::test]
    async fn wrong_passphrase_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.enc");

        LocalKeyProvider::create(&path, b"correct").unwrap();
        assert!(LocalKeyProvider::open(&path, b"wrong").is_err());
    }

    #[tokio::test]
    async fn truncated_keyfile_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.enc");
        std::fs::write(&path, [0u8; 20]).unwrap();
        assert!(LocalKeyProvider::open(&path, b"pass").is_err());
    }

    #[tokio::test]
    async fn rotation_keeps_old_keys() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.enc");

        let mut provider = LocalKeyProvider::create(&path, b"pass").unwrap();
        let key1 = provider.get_current_key().await.unwrap();

        let key2 = provider.rotate_key().await.unwrap();
        assert_ne!(key1.id, key2.id);
        assert_ne!(key1.key, key2.key);

        let old = provider.get_key_by_id(&key1.id).await.unwrap();
        assert_eq!(old.key, key1.key);
        assert_eq!(provider.get_current_key().await.unwrap().id, key2.id);

        let reopened = LocalKeyProvider::open(&path, b"pass").unwrap();
        assert_eq!(reopened.list_key_ids().await.unwrap().len(), 2);
        assert_eq!(reopened.get_current_key().await.unwrap().id, key2.id);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn keys_are_not_stored_in_clear() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.enc");
        let provider = LocalKeyProvider::create(&path, b"pass").unwrap();

        let raw = std::fs::read(&path).unwrap();
        let encoded = STANDARD.encode(provider.keystore.keys[0].key);
        let haystack = String::from_utf8_lossy(&raw);
        assert!(!haystack.contains(&encoded));
        assert!(!haystack.contains(&provider.keystore.current_key_id));
    }
}
