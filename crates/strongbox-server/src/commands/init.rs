use anyhow::Result;
use std::path::Path;

use strongbox_core::catalog::Catalog;
use strongbox_core::config::StrongboxConfig;

use crate::config::ServerConfig;

pub fn run(base_dir: &Path, cli_passphrase: &Option<String>) -> Result<()> {
    println!("Initializing Strongbox in {}", base_dir.display());

    std::fs::create_dir_all(base_dir)?;

    let config_path = StrongboxConfig::default_path(base_dir);
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        ServerConfig::default_config(base_dir).save(&config_path)?;
        println!("Created config: {}", config_path.display());
    }

    let config = ServerConfig::load(&config_path)?;
    let store = &config.strongbox.store;

    let _catalog = Catalog::open(Path::new(&store.db_path))?;
    println!("Initialized catalog: {}", store.db_path);

    std::fs::create_dir_all(&store.data_dir)?;
    println!("Payload directory: {}", store.data_dir);

    if store.key_provider == "local" {
        let keyfile_path = Path::new(&store.keyfile_path);
        if keyfile_path.exists() {
            println!("Keyfile already exists: {}", keyfile_path.display());
        } else {
            super::open_key_provider(&config.strongbox, cli_passphrase)?;
            println!("Created keyfile: {}", keyfile_path.display());
        }
    } else {
        println!("Key provider '{}' keeps no keyfile.", store.key_provider);
    }

    println!("\nStrongbox initialized. Next steps:");
    println!("  1. Set [http] admin_token in {}", config_path.display());
    println!("  2. For a cluster, list every member under [[nodes]] and copy the keyfile to each");
    println!("  3. Run `strongbox-server serve`");

    Ok(())
}
