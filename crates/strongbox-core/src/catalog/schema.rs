use rusqlite::Connection;

use crate::error::Result;

/// Run all migrations on the catalog database.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA foreign_keys=ON;

        CREATE TABLE IF NOT EXISTS containers (
            path        TEXT PRIMARY KEY,
            tags        TEXT NOT NULL DEFAULT '{}',
            settings    TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL
        );

        -- Renaming a container moves its objects through ON UPDATE CASCADE.
        CREATE TABLE IF NOT EXISTS objects (
            container   TEXT NOT NULL
                        REFERENCES containers(path) ON UPDATE CASCADE ON DELETE RESTRICT,
            object_key  TEXT NOT NULL,
            size        INTEGER NOT NULL,
            etag        TEXT NOT NULL,
            tags        TEXT NOT NULL DEFAULT '{}',
            cipher      TEXT NOT NULL,
            key_id      TEXT NOT NULL,
            nonce       BLOB NOT NULL,
            storage_key TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            PRIMARY KEY (container, object_key)
        );

        -- Highest primary sequence applied per resource key on a replica.
        -- Rows outlive the resource so a late write cannot resurrect it.
        CREATE TABLE IF NOT EXISTS applied_sequences (
            resource    TEXT PRIMARY KEY,
            sequence    INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}
