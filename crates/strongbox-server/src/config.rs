use std::path::Path;

use serde::{Deserialize, Serialize};
use strongbox_core::config::StrongboxConfig;

/// Node configuration: the store sections plus the HTTP listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub strongbox: StrongboxConfig,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Bearer token for `/_admin`. Admin routes answer 403 while unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8700".to_string()
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_token: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "config not found at {}; run `strongbox-server init` first",
                path.display()
            );
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.strongbox.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_config(base_dir: &Path) -> Self {
        Self {
            strongbox: StrongboxConfig::default_config(base_dir),
            http: HttpSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn http_section_sits_beside_store_sections() {
        let config: ServerConfig = toml::from_str(
            r#"
            [store]
            max_object_bytes = 1024

            [replication]
            node_id = 2
            replication_factor = 2

            [[nodes]]
            id = 1
            endpoint = "http://10.0.0.1:8700"
            role = "primary"

            [[nodes]]
            id = 2
            endpoint = "http://10.0.0.2:8700"
            role = "replica"

            [http]
            listen_addr = "0.0.0.0:9000"
            admin_token = "s3cret"
            "#,
        )
        .unwrap();

        assert_eq!(config.strongbox.store.max_object_bytes, 1024);
        assert_eq!(config.strongbox.replication.node_id, 2);
        assert_eq!(config.strongbox.nodes.len(), 2);
        assert_eq!(config.http.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.http.admin_token.as_deref(), Some("s3cret"));
        config.strongbox.validate().unwrap();
    }

    #[test]
    fn http_section_is_optional() {
        let config: ServerConfig = toml::from_str("[store]\nlock_timeout_ms = 50\n").unwrap();
        assert_eq!(config.http.listen_addr, "127.0.0.1:8700");
        assert!(config.http.admin_token.is_none());
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("strongbox.toml");
        let mut config = ServerConfig::default_config(tmp.path());
        config.http.admin_token = Some("token".into());
        config.save(&path).unwrap();

        let loaded = ServerConfig::load(&path).unwrap();
        assert_eq!(loaded.http.admin_token.as_deref(), Some("token"));
        assert_eq!(loaded.strongbox.store.db_path, config.strongbox.store.db_path);
    }

    #[test]
    fn missing_file_names_the_init_command() {
        let tmp = TempDir::new().unwrap();
        let err = ServerConfig::load(&tmp.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("init"));
    }
}
