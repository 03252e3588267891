use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use subtle::ConstantTimeEq;

use crate::error::{Result, StoreError};
use crate::types::{CipherId, EncryptionInfo, KeyMaterial};

/// Associated data bound into every sealed payload.
const PAYLOAD_AAD: &[u8] = b"strongbox-object-v1";

/// A sealed payload plus the metadata needed to open it again.
pub struct SealedPayload {
    pub ciphertext: Vec<u8>,
    pub info: EncryptionInfo,
}

impl std::fmt::Debug for SealedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedPayload")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("key_id", &self.info.key_id)
            .finish()
    }
}

/// Seals and opens object payloads with AES-256-GCM.
///
/// New payloads are always sealed under the current key with a fresh
/// random nonce. Retired keys stay in the keyring so objects written
/// before a rotation can still be opened.
pub struct EncryptionManager {
    current_id: String,
    keys: HashMap<String, KeyMaterial>,
}

impl EncryptionManager {
    pub fn new(current: KeyMaterial, retired: impl IntoIterator<Item = KeyMaterial>) -> Self {
        let current_id = current.id.clone();
        let mut keys: HashMap<String, KeyMaterial> =
            retired.into_iter().map(|k| (k.id.clone(), k)).collect();
        keys.insert(current_id.clone(), current);
        Self { current_id, keys }
    }

    /// Manager with a single random key. Nothing it seals survives the process.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self::new(
            KeyMaterial {
                id: format!("ephemeral-{}", uuid::Uuid::now_v7()),
                key,
            },
            [],
        )
    }

    pub fn current_key_id(&self) -> &str {
        &self.current_id
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.keys.keys().cloned().collect()
    }

    /// Encrypt `plaintext` under the current key with a freshly generated nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedPayload> {
        let key = self
            .keys
            .get(&self.current_id)
            .ok_or_else(|| StoreError::Encryption("current key missing from keyring".into()))?;
        let cipher = Aes256Gcm::new_from_slice(&key.key)
            .map_err(|e| StoreError::Encryption(format!("Invalid key: {e}")))?;

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                aes_gcm::aead::Payload {
                    msg: plaintext,
                    aad: PAYLOAD_AAD,
                },
            )
            .map_err(|e| StoreError::Encryption(format!("Encryption failed: {e}")))?;

        Ok(SealedPayload {
            ciphertext,
            info: EncryptionInfo {
                cipher: CipherId::Aes256Gcm,
                key_id: key.id.clone(),
                nonce: nonce_bytes,
            },
        })
    }

    /// Decrypt a payload. Any authentication failure is a `Decryption` error;
    /// partial plaintext is never returned.
    pub fn open(&self, ciphertext: &[u8], info: &EncryptionInfo) -> Result<Vec<u8>> {
        match info.cipher {
            CipherId::Aes256Gcm => {}
        }
        let key = self
            .keys
            .get(&info.key_id)
            .ok_or_else(|| StoreError::Decryption(format!("Key not found: {}", info.key_id)))?;
        let cipher = Aes256Gcm::new_from_slice(&key.key)
            .map_err(|e| StoreError::Decryption(format!("Invalid key: {e}")))?;

        cipher
            .decrypt(
                Nonce::from_slice(&info.nonce),
                aes_gcm::aead::Payload {
                    msg: ciphertext,
                    aad: PAYLOAD_AAD,
                },
            )
            .map_err(|e| StoreError::Decryption(format!("Decryption failed: {e}")))
    }
}

impl std::fmt::Debug for EncryptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionManager")
            .field("current_id", &self.current_id)
            .field("keys", &self.keys.len())
            .finish()
    }
}

/// SHA-256 of a plaintext payload, hex encoded.
pub fn content_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Constant-time digest comparison.
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    expected.as_bytes().ct_eq(actual.as_bytes()).into()
}
