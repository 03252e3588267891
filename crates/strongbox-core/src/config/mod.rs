use crate::error::{Result, StoreError};
use crate::types::NodeRole;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level Strongbox configuration stored as TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrongboxConfig {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub replication: ReplicationSettings,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub audit: AuditSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Path to the SQLite catalog of containers and objects.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Directory holding sealed object payloads.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Key provider type ("local" or "ephemeral").
    #[serde(default = "default_key_provider")]
    pub key_provider: String,
    /// Path to the encrypted keyfile (for the local key provider).
    #[serde(default = "default_keyfile_path")]
    pub keyfile_path: String,
    /// Largest plaintext payload accepted for a single object.
    #[serde(default = "default_max_object_bytes")]
    pub max_object_bytes: u64,
    /// Lock timeout used when a request does not carry its own.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            data_dir: default_data_dir(),
            key_provider: default_key_provider(),
            keyfile_path: default_keyfile_path(),
            max_object_bytes: default_max_object_bytes(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StoreSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Identity of this process in `nodes`.
    #[serde(default = "default_node_id")]
    pub node_id: u64,
    /// Total copies (primary included) required for a durable mutation.
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
    /// Per-replica acknowledgment timeout.
    #[serde(default = "default_replica_timeout_ms")]
    pub replica_timeout_ms: u64,
    /// Consecutive missed acknowledgments before a node is marked Unreachable.
    #[serde(default = "default_unreachable_after")]
    pub unreachable_after: u32,
    /// Interval of the background health probe.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Bearer token presented to and required from peers on replica traffic.
    #[serde(default)]
    pub cluster_token: Option<String>,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            replication_factor: default_replication_factor(),
            replica_timeout_ms: default_replica_timeout_ms(),
            unreachable_after: default_unreachable_after(),
            probe_interval_ms: default_probe_interval_ms(),
            cluster_token: None,
        }
    }
}

impl ReplicationSettings {
    pub fn replica_timeout(&self) -> Duration {
        Duration::from_millis(self.replica_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: u64,
    /// Base URL of the node, e.g. `http://10.0.0.2:8700`.
    pub endpoint: String,
    #[serde(default)]
    pub role: NodeRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Audit database path. Defaults to the catalog database.
    #[serde(default)]
    pub db_path: Option<String>,
    /// Entries waiting for the writer before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound on a single sink write.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Entries kept in memory while the sink is unavailable.
    #[serde(default = "default_retry_buffer")]
    pub retry_buffer: usize,
    /// Page size used when enumerating entries.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            queue_capacity: default_queue_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            retry_buffer: default_retry_buffer(),
            page_size: default_page_size(),
        }
    }
}

impl AuditSettings {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

fn default_db_path() -> String {
    "strongbox.db".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_key_provider() -> String {
    "local".to_string()
}

fn default_keyfile_path() -> String {
    "keys.enc".to_string()
}

fn default_max_object_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_node_id() -> u64 {
    1
}

fn default_replication_factor() -> u32 {
    1
}

fn default_replica_timeout_ms() -> u64 {
    2_000
}

fn default_unreachable_after() -> u32 {
    3
}

fn default_probe_interval_ms() -> u64 {
    10_000
}

fn default_queue_capacity() -> usize {
    4_096
}

fn default_write_timeout_ms() -> u64 {
    1_000
}

fn default_retry_buffer() -> usize {
    10_000
}

fn default_page_size() -> usize {
    256
}

impl StrongboxConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StoreError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| StoreError::TomlDe(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StoreError::TomlSer(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.replication.replication_factor == 0 {
            return Err(StoreError::Config(
                "replication_factor must be at least 1".to_string(),
            ));
        }
        if self.replication.unreachable_after == 0 {
            return Err(StoreError::Config(
                "unreachable_after must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(StoreError::Config(format!("duplicate node id {}", node.id)));
            }
        }
        if !self.nodes.is_empty() && !seen.contains(&self.replication.node_id) {
            return Err(StoreError::Config(format!(
                "local node {} is not listed in [[nodes]]",
                self.replication.node_id
            )));
        }

        let copies = self.nodes.len().max(1) as u32;
        if self.replication.replication_factor > copies {
            tracing::warn!(
                "replication_factor {} exceeds the {copies} configured node(s); every mutation will report degraded replication",
                self.replication.replication_factor
            );
        }
        Ok(())
    }

    /// Default config for a fresh install rooted at `base_dir`.
    pub fn default_config(base_dir: &Path) -> Self {
        Self {
            store: StoreSettings {
                db_path: base_dir.join("strongbox.db").display().to_string(),
                data_dir: base_dir.join("data").display().to_string(),
                keyfile_path: base_dir.join("keys.enc").display().to_string(),
                ..StoreSettings::default()
            },
            replication: ReplicationSettings::default(),
            nodes: vec![],
            audit: AuditSettings::default(),
        }
    }

    /// Resolve the config file path: `<base_dir>/strongbox.toml`
    pub fn default_path(base_dir: &Path) -> PathBuf {
        base_dir.join("strongbox.toml")
    }

    /// Resolve the default home directory: `~/.strongbox`
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(".strongbox"))
            .ok_or_else(|| StoreError::Config("Cannot determine home directory".to_string()))
    }

    /// Database holding the audit trail.
    pub fn audit_db_path(&self) -> &str {
        self.audit.db_path.as_deref().unwrap_or(&self.store.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn roundtrip_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("strongbox.toml");
        let config = StrongboxConfig::default_config(tmp.path());
        config.save(&path).unwrap();
        let loaded = StrongboxConfig::load(&path).unwrap();
        assert_eq!(loaded.store.key_provider, "local");
        assert_eq!(loaded.replication.replication_factor, 1);
        assert!(loaded.nodes.is_empty());
    }

    #[test]
    fn load_nonexistent_returns_error() {
        let result = StrongboxConfig::load(Path::new("/nonexistent/strongbox.toml"));
        assert!(matches!(result, Err(StoreError::ConfigNotFound(_))));
    }

    #[test]
    fn parses_topology_sections() {
        let toml_src = r#"
            [replication]
            node_id = 1
            replication_factor = 2

            [[nodes]]
            id = 1
            endpoint = "http://127.0.0.1:8700"
            role = "primary"

            [[nodes]]
            id = 2
            endpoint = "http://127.0.0.1:8701"
        "#;
        let config: StrongboxConfig = toml::from_str(toml_src).unwrap();
        config.validate().unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].role, NodeRole::Primary);
        assert_eq!(config.nodes[1].role, NodeRole::Replica);
        assert_eq!(config.store.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_zero_replication_factor() {
        let mut config = StrongboxConfig::default();
        config.replication.replication_factor = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_local_node() {
        let mut config = StrongboxConfig::default();
        config.replication.node_id = 7;
        config.nodes.push(NodeConfig {
            id: 1,
            endpoint: "http://127.0.0.1:8700".into(),
            role: NodeRole::Primary,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn audit_db_defaults_to_catalog() {
        let tmp = TempDir::new().unwrap();
        let mut config = StrongboxConfig::default_config(tmp.path());
        assert_eq!(config.audit_db_path(), config.store.db_path);
        config.audit.db_path = Some("/var/lib/strongbox/audit.db".into());
        assert_eq!(config.audit_db_path(), "/var/lib/strongbox/audit.db");
    }
}
