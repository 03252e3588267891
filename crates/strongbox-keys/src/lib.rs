pub mod ephemeral;
pub mod factory;
pub mod local;
pub mod provider;

use strongbox_core::crypto::EncryptionManager;
use strongbox_core::types::KeyMaterial;

use crate::provider::KeyProvider;

/// Build the payload keyring from a provider: the current key seals,
/// every other key the provider knows stays available for opening.
pub async fn load_keyring(provider: &dyn KeyProvider) -> anyhow::Result<EncryptionManager> {
    let current = provider.get_current_key().await?;
    let mut retired = Vec::new();
    for id in provider.list_key_ids().await? {
        if id != current.id {
            retired.push(KeyMaterial::from(&provider.get_key_by_id(&id).await?));
        }
    }
    tracing::info!(
        current = %current.id,
        retired = retired.len(),
        "payload keyring loaded"
    );
    Ok(EncryptionManager::new(KeyMaterial::from(&current), retired))
}
