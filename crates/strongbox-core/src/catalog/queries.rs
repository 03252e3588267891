use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

use super::{conversion_error, format_timestamp, parse_timestamp};
use crate::error::{Result, StoreError};
use crate::types::{
    CipherId, Container, ContainerPath, ContainerSettings, EncryptionInfo, ObjectKey,
    ObjectRecord, ResourceKey, Tags,
};
use chrono::{DateTime, Utc};

const OBJECT_COLUMNS: &str = "container, object_key, size, etag, tags, cipher, key_id, nonce, \
                              storage_key, created_at, modified_at";

/// SQLite catalog of containers and object records.
///
/// Payload bytes are not stored here, only the storage key that locates
/// the sealed payload on the backing medium.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open (or create) the catalog database and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        super::schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    // ── Containers ─────────────────────────────────────────────

    pub fn get_container(&self, path: &ContainerPath) -> Result<Option<Container>> {
        let container = self
            .conn
            .query_row(
                "SELECT path, tags, settings, created_at FROM containers WHERE path = ?1",
                [path.as_str()],
                container_from_row,
            )
            .optional()?;
        Ok(container)
    }

    pub fn container_exists(&self, path: &ContainerPath) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM containers WHERE path = ?1",
            [path.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Create the container, or replace its tags if it exists.
    /// Returns true when the container was created.
    pub fn upsert_container(
        &self,
        path: &ContainerPath,
        tags: &Tags,
        now: &DateTime<Utc>,
    ) -> Result<bool> {
        let tags_json = serde_json::to_string(tags)?;
        let updated = self.conn.execute(
            "UPDATE containers SET tags = ?2 WHERE path = ?1",
            params![path.as_str(), tags_json],
        )?;
        if updated > 0 {
            return Ok(false);
        }
        let settings_json = serde_json::to_string(&ContainerSettings::default())?;
        self.conn.execute(
            "INSERT INTO containers (path, tags, settings, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                path.as_str(),
                tags_json,
                settings_json,
                format_timestamp(now)
            ],
        )?;
        Ok(true)
    }

    /// Write a full container row, keeping its objects. Used for replicated state.
    pub fn put_container(&self, container: &Container) -> Result<()> {
        self.conn.execute(
            "INSERT INTO containers (path, tags, settings, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                tags = excluded.tags,
                settings = excluded.settings,
                created_at = excluded.created_at",
            params![
                container.path.as_str(),
                serde_json::to_string(&container.tags)?,
                serde_json::to_string(&container.settings)?,
                format_timestamp(&container.created_at)
            ],
        )?;
        Ok(())
    }

    pub fn set_container_settings(
        &self,
        path: &ContainerPath,
        settings: &ContainerSettings,
    ) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE containers SET settings = ?2 WHERE path = ?1",
            params![path.as_str(), serde_json::to_string(settings)?],
        )?;
        Ok(updated > 0)
    }

    /// Delete an empty container. Fails with `Conflict` if objects remain.
    pub fn delete_container(&self, path: &ContainerPath) -> Result<bool> {
        let remaining = self.count_objects(path)?;
        if remaining > 0 {
            return Err(StoreError::Conflict(format!(
                "container '{path}' still holds {remaining} object(s)"
            )));
        }
        let deleted = self
            .conn
            .execute("DELETE FROM containers WHERE path = ?1", [path.as_str()])?;
        Ok(deleted > 0)
    }

    /// Delete a container together with its objects in one transaction.
    /// Returns the storage keys of the removed payloads.
    pub fn delete_container_cascade(&self, path: &ContainerPath) -> Result<Vec<String>> {
        let tx = self.conn.unchecked_transaction()?;
        let storage_keys = {
            let mut stmt = tx.prepare("SELECT storage_key FROM objects WHERE container = ?1")?;
            let rows = stmt.query_map([path.as_str()], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute("DELETE FROM objects WHERE container = ?1", [path.as_str()])?;
        tx.execute("DELETE FROM containers WHERE path = ?1", [path.as_str()])?;
        tx.commit()?;
        Ok(storage_keys)
    }

    /// Move a container and all of its objects to a new path atomically.
    pub fn rename_container(&self, from: &ContainerPath, to: &ContainerPath) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let taken: i64 = tx.query_row(
            "SELECT COUNT(*) FROM containers WHERE path = ?1",
            [to.as_str()],
            |row| row.get(0),
        )?;
        if taken > 0 {
            return Err(StoreError::Conflict(format!("container '{to}' already exists")));
        }
        let moved = tx.execute(
            "UPDATE containers SET path = ?2 WHERE path = ?1",
            params![from.as_str(), to.as_str()],
        )?;
        if moved == 0 {
            return Err(StoreError::NotFound(format!("container '{from}'")));
        }
        tx.commit()?;
        Ok(())
    }

    /// Immediate sub-containers of `path`, sorted.
    pub fn child_containers(&self, path: &ContainerPath) -> Result<Vec<ContainerPath>> {
        let pattern = like_prefix(&format!("{path}/"));
        let mut stmt = self.conn.prepare(
            "SELECT path FROM containers WHERE path LIKE ?1 ESCAPE '\\' ORDER BY path",
        )?;
        let rows = stmt.query_map([pattern], |row| row.get::<_, String>(0))?;

        let mut children = Vec::new();
        for raw in rows {
            let child = ContainerPath::parse(&raw?)?;
            // LIKE is case-insensitive for ASCII; the exact check is not.
            if child.is_child_of(path) {
                children.push(child);
            }
        }
        Ok(children)
    }

    pub fn count_objects(&self, path: &ContainerPath) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE container = ?1",
            [path.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn list_object_keys(&self, path: &ContainerPath) -> Result<Vec<ObjectKey>> {
        let mut stmt = self.conn.prepare(
            "SELECT object_key FROM objects WHERE container = ?1 ORDER BY object_key",
        )?;
        let rows = stmt.query_map([path.as_str()], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for raw in rows {
            keys.push(ObjectKey::parse(&raw?)?);
        }
        Ok(keys)
    }

    // ── Objects ────────────────────────────────────────────────

    pub fn get_object(
        &self,
        container: &ContainerPath,
        key: &ObjectKey,
    ) -> Result<Option<ObjectRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {OBJECT_COLUMNS} FROM objects WHERE container = ?1 AND object_key = ?2"
                ),
                params![container.as_str(), key.as_str()],
                object_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn object_exists(&self, container: &ContainerPath, key: &ObjectKey) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE container = ?1 AND object_key = ?2",
            params![container.as_str(), key.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert or replace an object record.
    /// Returns the storage key of the payload it superseded, if any.
    pub fn put_object(&self, record: &ObjectRecord) -> Result<Option<String>> {
        let tx = self.conn.unchecked_transaction()?;
        let previous: Option<String> = tx
            .query_row(
                "SELECT storage_key FROM objects WHERE container = ?1 AND object_key = ?2",
                params![record.container.as_str(), record.key.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            &format!(
                "INSERT INTO objects ({OBJECT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(container, object_key) DO UPDATE SET
                    size = excluded.size,
                    etag = excluded.etag,
                    tags = excluded.tags,
                    cipher = excluded.cipher,
                    key_id = excluded.key_id,
                    nonce = excluded.nonce,
                    storage_key = excluded.storage_key,
                    created_at = excluded.created_at,
                    modified_at = excluded.modified_at"
            ),
            params![
                record.container.as_str(),
                record.key.as_str(),
                record.size as i64,
                record.etag,
                serde_json::to_string(&record.tags)?,
                record.encryption.cipher.to_string(),
                record.encryption.key_id,
                record.encryption.nonce.as_slice(),
                record.storage_key,
                format_timestamp(&record.created_at),
                format_timestamp(&record.modified_at),
            ],
        )?;
        tx.commit()?;

        Ok(previous.filter(|prev| *prev != record.storage_key))
    }

    pub fn set_object_tags(
        &self,
        container: &ContainerPath,
        key: &ObjectKey,
        tags: &Tags,
        now: &DateTime<Utc>,
    ) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE objects SET tags = ?3, modified_at = ?4 WHERE container = ?1 AND object_key = ?2",
            params![
                container.as_str(),
                key.as_str(),
                serde_json::to_string(tags)?,
                format_timestamp(now)
            ],
        )?;
        Ok(updated > 0)
    }

    /// Remove an object record. Returns the storage key of its payload.
    pub fn delete_object(
        &self,
        container: &ContainerPath,
        key: &ObjectKey,
    ) -> Result<Option<String>> {
        let tx = self.conn.unchecked_transaction()?;
        let storage_key: Option<String> = tx
            .query_row(
                "SELECT storage_key FROM objects WHERE container = ?1 AND object_key = ?2",
                params![container.as_str(), key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if storage_key.is_some() {
            tx.execute(
                "DELETE FROM objects WHERE container = ?1 AND object_key = ?2",
                params![container.as_str(), key.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(storage_key)
    }

    // ── Replica intake ─────────────────────────────────────────

    /// Highest primary sequence this node has applied to `resource`.
    pub fn applied_sequence(&self, resource: &ResourceKey) -> Result<Option<u64>> {
        let sequence: Option<i64> = self
            .conn
            .query_row(
                "SELECT sequence FROM applied_sequences WHERE resource = ?1",
                [resource.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(sequence.map(|s| s.max(0) as u64))
    }

    /// Raise the applied sequence of `resource`; never lowers it.
    pub fn record_applied_sequence(&self, resource: &ResourceKey, sequence: u64) -> Result<()> {
        let sequence = i64::try_from(sequence)
            .map_err(|_| StoreError::Internal(format!("sequence {sequence} out of range")))?;
        self.conn.execute(
            "INSERT INTO applied_sequences (resource, sequence) VALUES (?1, ?2)
             ON CONFLICT(resource) DO UPDATE SET
                sequence = MAX(sequence, excluded.sequence)",
            params![resource.to_string(), sequence],
        )?;
        Ok(())
    }
}

fn container_from_row(row: &Row<'_>) -> rusqlite::Result<Container> {
    let path: String = row.get(0)?;
    let tags: String = row.get(1)?;
    let settings: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    Ok(Container {
        path: ContainerPath::parse(&path).map_err(|e| conversion_error(0, e))?,
        tags: serde_json::from_str(&tags).map_err(|e| conversion_error(1, e))?,
        settings: serde_json::from_str(&settings).map_err(|e| conversion_error(2, e))?,
        created_at: parse_timestamp(3, &created_at)?,
    })
}

fn object_from_row(row: &Row<'_>) -> rusqlite::Result<ObjectRecord> {
    let container: String = row.get(0)?;
    let key: String = row.get(1)?;
    let size: i64 = row.get(2)?;
    let tags: String = row.get(4)?;
    let cipher: String = row.get(5)?;
    let nonce: Vec<u8> = row.get(7)?;
    let created_at: String = row.get(9)?;
    let modified_at: String = row.get(10)?;

    let nonce: [u8; 12] = nonce.try_into().map_err(|_| {
        conversion_error(7, StoreError::Decryption("stored nonce is not 12 bytes".into()))
    })?;

    Ok(ObjectRecord {
        container: ContainerPath::parse(&container).map_err(|e| conversion_error(0, e))?,
        key: ObjectKey::parse(&key).map_err(|e| conversion_error(1, e))?,
        size: size as u64,
        etag: row.get(3)?,
        tags: serde_json::from_str(&tags).map_err(|e| conversion_error(4, e))?,
        encryption: EncryptionInfo {
            cipher: cipher
                .parse::<CipherId>()
                .map_err(|e| conversion_error(5, e))?,
            key_id: row.get(6)?,
            nonce,
        },
        storage_key: row.get(8)?,
        created_at: parse_timestamp(9, &created_at)?,
        modified_at: parse_timestamp(10, &modified_at)?,
    })
}

/// LIKE pattern matching every string that starts with `prefix`.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
