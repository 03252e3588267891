pub mod init;
pub mod rotate_key;
pub mod serve;

use std::path::Path;

use strongbox_core::config::StrongboxConfig;
use strongbox_keys::factory::create_key_provider;
use strongbox_keys::provider::KeyProvider;

use crate::config::ServerConfig;

/// Config at `<base_dir>/strongbox.toml`.
pub fn load_config(base_dir: &Path) -> anyhow::Result<ServerConfig> {
    ServerConfig::load(&StrongboxConfig::default_path(base_dir))
}

/// Open the configured key provider, asking for a passphrase only when the
/// provider needs one.
pub fn open_key_provider(
    config: &StrongboxConfig,
    cli_passphrase: &Option<String>,
) -> anyhow::Result<Box<dyn KeyProvider>> {
    let passphrase = match config.store.key_provider.as_str() {
        "local" => Some(crate::get_passphrase(cli_passphrase)?),
        _ => None,
    };
    create_key_provider(
        &config.store.key_provider,
        passphrase.as_deref().map(str::as_bytes),
        &config.store.keyfile_path,
    )
}
