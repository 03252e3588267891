use anyhow::Result;
use std::path::Path;

pub async fn run(base_dir: &Path, cli_passphrase: &Option<String>) -> Result<()> {
    let config = super::load_config(base_dir)?;
    if config.strongbox.store.key_provider != "local" {
        anyhow::bail!(
            "key provider '{}' does not persist keys; nothing to rotate",
            config.strongbox.store.key_provider
        );
    }

    let mut provider = super::open_key_provider(&config.strongbox, cli_passphrase)?;
    let previous = provider.get_current_key().await?.id.clone();
    let current = provider.rotate_key().await?;
    println!("Rotated payload key: {previous} -> {}", current.id);
    println!("Copy the keyfile to every node and restart them to seal with the new key.");
    Ok(())
}
