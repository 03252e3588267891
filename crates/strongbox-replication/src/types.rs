use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strongbox_core::types::{
    Container, ContainerPath, ContainerSettings, ObjectKey, ObjectRecord, ResourceKey, Tags,
};
use uuid::Uuid;

/// Mutations that are propagated from the primary to replicas.
///
/// Object payloads travel sealed: replicas store the ciphertext as-is and
/// never see plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    UpsertContainer {
        container: Container,
    },
    ConfigureContainer {
        path: ContainerPath,
        settings: ContainerSettings,
    },
    DeleteContainer {
        path: ContainerPath,
        cascade: bool,
    },
    RenameContainer {
        from: ContainerPath,
        to: ContainerPath,
    },
    PutObject {
        record: ObjectRecord,
        #[serde(with = "base64_bytes")]
        ciphertext: Vec<u8>,
    },
    SetObjectTags {
        container: ContainerPath,
        key: ObjectKey,
        tags: Tags,
        modified_at: DateTime<Utc>,
    },
    DeleteObject {
        container: ContainerPath,
        key: ObjectKey,
    },
}

impl Mutation {
    /// Resource the mutation addresses (the source, for a rename).
    pub fn resource(&self) -> ResourceKey {
        match self {
            Mutation::UpsertContainer { container } => ResourceKey::container(container.path.clone()),
            Mutation::ConfigureContainer { path, .. } | Mutation::DeleteContainer { path, .. } => {
                ResourceKey::container(path.clone())
            }
            Mutation::RenameContainer { from, .. } => ResourceKey::container(from.clone()),
            Mutation::PutObject { record, .. } => record.resource_key(),
            Mutation::SetObjectTags { container, key, .. }
            | Mutation::DeleteObject { container, key } => {
                ResourceKey::object(container.clone(), key.clone())
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mutation::UpsertContainer { .. } => "upsert_container",
            Mutation::ConfigureContainer { .. } => "configure_container",
            Mutation::DeleteContainer { .. } => "delete_container",
            Mutation::RenameContainer { .. } => "rename_container",
            Mutation::PutObject { .. } => "put_object",
            Mutation::SetObjectTags { .. } => "set_object_tags",
            Mutation::DeleteObject { .. } => "delete_object",
        }
    }
}

/// Envelope sent over the wire to each replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedMutation {
    pub id: Uuid,
    /// Node id of the primary that issued the mutation.
    pub origin: u64,
    /// Position in the primary's commit order. Stamped while the primary
    /// holds the resource's locks, so it grows with every mutation of the
    /// same resource key.
    pub sequence: u64,
    pub issued_at: DateTime<Utc>,
    pub op: Mutation,
}

impl ReplicatedMutation {
    pub fn new(origin: u64, sequence: u64, op: Mutation) -> Self {
        Self {
            id: Uuid::now_v7(),
            origin,
            sequence,
            issued_at: Utc::now(),
            op,
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        use serde::de::Error;
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongbox_core::types::{CipherId, EncryptionInfo};

    #[test]
    fn put_object_wire_form() {
        let now = Utc::now();
        let record = ObjectRecord {
            container: ContainerPath::parse("c1").unwrap(),
            key: ObjectKey::parse("k1").unwrap(),
            size: 5,
            etag: "e".into(),
            tags: Tags::new(),
            created_at: now,
            modified_at: now,
            encryption: EncryptionInfo {
                cipher: CipherId::Aes256Gcm,
                key_id: "key".into(),
                nonce: [1; 12],
            },
            storage_key: "objects/aa/bb/x".into(),
        };
        let m = ReplicatedMutation::new(
            1,
            42,
            Mutation::PutObject {
                record,
                ciphertext: vec![0, 1, 2, 255],
            },
        );
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["op"]["op"], "put_object");
        assert_eq!(json["op"]["ciphertext"], "AAEC/w==");
        assert_eq!(json["sequence"], 42);

        let back: ReplicatedMutation = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.op.resource().to_string(), "c1:k1");
    }

    #[test]
    fn rename_addresses_source() {
        let m = Mutation::RenameContainer {
            from: ContainerPath::parse("a").unwrap(),
            to: ContainerPath::parse("b").unwrap(),
        };
        assert_eq!(m.resource().to_string(), "a");
        assert_eq!(m.name(), "rename_container");
    }
}
