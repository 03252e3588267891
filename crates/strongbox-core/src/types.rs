use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::StoreError;

/// Free-form tag set attached to containers and objects.
pub type Tags = BTreeMap<String, String>;

/// Maximum length of an object key in bytes.
pub const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Normalized, `/`-separated container path.
///
/// Leading, trailing and repeated separators are dropped. Segments may not
/// be `.` or `..`, and may not contain `:` (reserved as the object key
/// delimiter in [`ResourceKey`]) or control characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerPath(String);

impl ContainerPath {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            if segment.is_empty() {
                continue;
            }
            if segment == "." || segment == ".." {
                return Err(StoreError::InvalidResourceKey(format!(
                    "relative segment in container path '{raw}'"
                )));
            }
            if segment.contains(':') || segment.chars().any(char::is_control) {
                return Err(StoreError::InvalidResourceKey(format!(
                    "illegal character in container path '{raw}'"
                )));
            }
            segments.push(segment);
        }
        if segments.is_empty() {
            return Err(StoreError::InvalidResourceKey(
                "container path is empty".to_string(),
            ));
        }
        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent container path, or `None` for a top-level container.
    pub fn parent(&self) -> Option<ContainerPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| ContainerPath(parent.to_string()))
    }

    /// True if `self` is an immediate child of `parent`.
    pub fn is_child_of(&self, parent: &ContainerPath) -> bool {
        self.parent().as_ref() == Some(parent)
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContainerPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContainerPath::parse(&value)
    }
}

impl From<ContainerPath> for String {
    fn from(value: ContainerPath) -> Self {
        value.0
    }
}

impl std::str::FromStr for ContainerPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContainerPath::parse(s)
    }
}

/// Object key within a container. Case-sensitive, taken verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if raw.is_empty() {
            return Err(StoreError::InvalidResourceKey(
                "object key is empty".to_string(),
            ));
        }
        if raw.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidResourceKey(format!(
                "object key longer than {MAX_OBJECT_KEY_LEN} bytes"
            )));
        }
        if raw.chars().any(char::is_control) {
            return Err(StoreError::InvalidResourceKey(format!(
                "control character in object key '{}'",
                raw.escape_debug()
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ObjectKey::parse(&value)
    }
}

impl From<ObjectKey> for String {
    fn from(value: ObjectKey) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Container,
    Object,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Container => write!(f, "container"),
            ResourceKind::Object => write!(f, "object"),
        }
    }
}

/// Unique identity of a container or an object.
///
/// The derived ordering (all containers before all objects, then
/// lexicographic) is the global lock acquisition order.
///
/// Text form: `photos/2024` for a container, `photos/2024:cat.jpg` for an
/// object. Container paths never contain `:`, so the first `:` always
/// splits the two parts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceKey {
    Container(ContainerPath),
    Object {
        container: ContainerPath,
        key: ObjectKey,
    },
}

impl ResourceKey {
    pub fn container(path: ContainerPath) -> Self {
        ResourceKey::Container(path)
    }

    pub fn object(container: ContainerPath, key: ObjectKey) -> Self {
        ResourceKey::Object { container, key }
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw.split_once(':') {
            Some((container, key)) => Ok(ResourceKey::Object {
                container: ContainerPath::parse(container)?,
                key: ObjectKey::parse(key)?,
            }),
            None => Ok(ResourceKey::Container(ContainerPath::parse(raw)?)),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceKey::Container(_) => ResourceKind::Container,
            ResourceKey::Object { .. } => ResourceKind::Object,
        }
    }

    /// The container this key lives in (itself, for a container key).
    pub fn container_path(&self) -> &ContainerPath {
        match self {
            ResourceKey::Container(path) => path,
            ResourceKey::Object { container, .. } => container,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Container(path) => write!(f, "{path}"),
            ResourceKey::Object { container, key } => write!(f, "{container}:{key}"),
        }
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ResourceKey::parse(&value)
    }
}

impl From<ResourceKey> for String {
    fn from(value: ResourceKey) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for ResourceKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKey::parse(s)
    }
}

/// Container-level policy, replaced wholesale by a Configuration call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSettings {
    /// Disabled containers keep serving reads but reject object mutations.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides the global replication factor for this container's mutations.
    #[serde(default)]
    pub replication_factor: Option<u32>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            replication_factor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub path: ContainerPath,
    pub created_at: DateTime<Utc>,
    pub tags: Tags,
    pub settings: ContainerSettings,
}

impl Container {
    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }
}

/// Immediate children of a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerListing {
    pub path: ContainerPath,
    pub objects: Vec<ObjectKey>,
    pub containers: Vec<ContainerPath>,
}

/// Cipher suite used to seal a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherId {
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl fmt::Display for CipherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherId::Aes256Gcm => write!(f, "aes-256-gcm"),
        }
    }
}

impl std::str::FromStr for CipherId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-256-gcm" => Ok(CipherId::Aes256Gcm),
            other => Err(StoreError::Decryption(format!("unknown cipher '{other}'"))),
        }
    }
}

/// Per-object encryption metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub cipher: CipherId,
    pub key_id: String,
    pub nonce: [u8; 12],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub container: ContainerPath,
    pub key: ObjectKey,
    /// Plaintext length in bytes.
    pub size: u64,
    /// SHA-256 of the plaintext, hex encoded.
    pub etag: String,
    pub tags: Tags,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub encryption: EncryptionInfo,
    /// Location of the sealed payload on the backing medium.
    pub storage_key: String,
}

impl ObjectRecord {
    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::object(self.container.clone(), self.key.clone())
    }
}

/// Encryption key material, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    pub id: String,
    pub key: [u8; 32],
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Role of a node in the replication topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    #[default]
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Replica => write!(f, "replica"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_path_normalizes_separators() {
        let p = ContainerPath::parse("//photos///2024/").unwrap();
        assert_eq!(p.as_str(), "photos/2024");
        assert_eq!(p.name(), "2024");
        assert_eq!(p.parent().unwrap().as_str(), "photos");
        assert!(ContainerPath::parse("photos").unwrap().parent().is_none());
    }

    #[test]
    fn container_path_rejects_bad_segments() {
        assert!(ContainerPath::parse("").is_err());
        assert!(ContainerPath::parse("///").is_err());
        assert!(ContainerPath::parse("a/../b").is_err());
        assert!(ContainerPath::parse("a/./b").is_err());
        assert!(ContainerPath::parse("a:b").is_err());
        assert!(ContainerPath::parse("a/\u{0}b").is_err());
    }

    #[test]
    fn container_path_is_case_sensitive() {
        let lower = ContainerPath::parse("docs").unwrap();
        let upper = ContainerPath::parse("Docs").unwrap();
        assert_ne!(lower, upper);
    }

    #[test]
    fn child_relation_is_immediate_only() {
        let root = ContainerPath::parse("a").unwrap();
        assert!(ContainerPath::parse("a/b").unwrap().is_child_of(&root));
        assert!(!ContainerPath::parse("a/b/c").unwrap().is_child_of(&root));
        assert!(!ContainerPath::parse("ab").unwrap().is_child_of(&root));
    }

    #[test]
    fn resource_key_text_form() {
        let c = ResourceKey::parse("photos/2024").unwrap();
        assert_eq!(c.kind(), ResourceKind::Container);
        assert_eq!(c.to_string(), "photos/2024");

        let o = ResourceKey::parse("photos/2024:trip/cat.jpg").unwrap();
        assert_eq!(o.kind(), ResourceKind::Object);
        assert_eq!(o.container_path().as_str(), "photos/2024");
        assert_eq!(o.to_string(), "photos/2024:trip/cat.jpg");
    }

    #[test]
    fn object_and_nested_container_keys_do_not_collide() {
        let nested = ResourceKey::parse("c1/x").unwrap();
        let object = ResourceKey::parse("c1:x").unwrap();
        assert_ne!(nested, object);
        assert_ne!(nested.to_string(), object.to_string());
    }

    #[test]
    fn containers_order_before_objects() {
        let object = ResourceKey::parse("a:k").unwrap();
        let container = ResourceKey::parse("z").unwrap();
        assert!(container < object);

        let a = ResourceKey::parse("a").unwrap();
        let b = ResourceKey::parse("b").unwrap();
        assert!(a < b);
    }

    #[test]
    fn resource_key_serde_as_string() {
        let key = ResourceKey::parse("c1:k1").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"c1:k1\"");
        let back: ResourceKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<ResourceKey>("\"a/..:k\"").is_err());
    }

    #[test]
    fn object_key_limits() {
        assert!(ObjectKey::parse("").is_err());
        assert!(ObjectKey::parse(&"k".repeat(MAX_OBJECT_KEY_LEN + 1)).is_err());
        assert!(ObjectKey::parse("dir/with spaces/ü.txt").is_ok());
    }

    #[test]
    fn key_material_debug_is_redacted() {
        let key = KeyMaterial {
            id: "test".to_string(),
            key: [0x42; 32],
        };
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("66"));
    }

    #[test]
    fn settings_default_enabled() {
        let s: ContainerSettings = serde_json::from_str("{}").unwrap();
        assert!(s.enabled);
        assert_eq!(s.replication_factor, None);
    }
}
