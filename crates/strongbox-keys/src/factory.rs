//! Factory for creating the configured KeyProvider.

use std::path::Path;

use crate::ephemeral::EphemeralKeyProvider;
use crate::local::LocalKeyProvider;
use crate::provider::KeyProvider;

/// Create a KeyProvider from the `store.key_provider` setting.
///
/// Supported types:
/// - `"local"`: passphrase-protected keyfile, created on first use
/// - `"ephemeral"`: random in-memory keys, lost on restart
pub fn create_key_provider(
    provider_type: &str,
    passphrase: Option<&[u8]>,
    keyfile_path: &str,
) -> anyhow::Result<Box<dyn KeyProvider>> {
    match provider_type {
        "local" => {
            let passphrase = passphrase
                .ok_or_else(|| anyhow::anyhow!("Passphrase required for local key provider"))?;
            let path = Path::new(keyfile_path);
            let provider = if path.exists() {
                LocalKeyProvider::open(path, passphrase)?
            } else {
                LocalKeyProvider::create(path, passphrase)?
            };
            Ok(Box::new(provider))
        }
        "ephemeral" => {
            tracing::warn!("ephemeral key provider: stored payloads will be unreadable after restart");
            Ok(Box::new(EphemeralKeyProvider::new()))
        }
        other => anyhow::bail!("Unknown key provider type: {other}"),
    }
}
