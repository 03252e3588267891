use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use super::{
    AuditCursor, AuditEntryType, AuditFilter, AuditLogEntry, AuditOutcome, AuditRecord, AuditSink,
};
use crate::catalog::{conversion_error, format_timestamp, parse_timestamp};
use crate::error::Result;

const MIGRATE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS audit_log (
    seq         INTEGER PRIMARY KEY,
    timestamp   TEXT NOT NULL,
    entry_type  TEXT NOT NULL,
    resource    TEXT NOT NULL,
    target      TEXT,
    actor       TEXT NOT NULL,
    outcome     TEXT NOT NULL,
    detail      TEXT,
    duration_us INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_log_order ON audit_log(timestamp, seq);
CREATE INDEX IF NOT EXISTS idx_audit_log_resource ON audit_log(resource, timestamp, seq);
CREATE INDEX IF NOT EXISTS idx_audit_log_type ON audit_log(entry_type, timestamp, seq);
"#;

/// Audit trail stored in a SQLite table. Rows are only ever inserted.
pub struct SqliteAuditSink {
    conn: Mutex<Connection>,
}

impl SqliteAuditSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(MIGRATE_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let entry = &record.entry;
        let (outcome, detail) = match &entry.outcome {
            AuditOutcome::Success { degraded } => ("success", degraded.as_deref()),
            AuditOutcome::Failure { reason } => ("failure", Some(reason.as_str())),
        };
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT OR IGNORE INTO audit_log
                (seq, timestamp, entry_type, resource, target, actor, outcome, detail, duration_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.seq as i64,
                format_timestamp(&entry.timestamp),
                entry.entry_type.as_str(),
                entry.resource,
                entry.target,
                entry.actor,
                outcome,
                detail,
                entry.duration_us as i64,
            ],
        )?;
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        after: Option<&AuditCursor>,
        limit: usize,
    ) -> Result<Vec<AuditRecord>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(
            "SELECT seq, timestamp, entry_type, resource, target, actor, outcome, detail, duration_us
             FROM audit_log
             WHERE (?1 IS NULL OR resource = ?1 OR target = ?1)
               AND (?2 IS NULL OR entry_type = ?2)
               AND (?3 IS NULL OR timestamp > ?3 OR (timestamp = ?3 AND seq > ?4))
             ORDER BY timestamp, seq
             LIMIT ?5",
        )?;
        let records = stmt
            .query_map(
                params![
                    filter.resource,
                    filter.entry_type.map(|t| t.as_str()),
                    after.map(|c| format_timestamp(&c.timestamp)),
                    after.map(|c| c.seq as i64).unwrap_or(0),
                    i64::try_from(limit).unwrap_or(i64::MAX),
                ],
                record_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn last_cursor(&self) -> Result<Option<AuditCursor>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let row = conn
            .query_row(
                "SELECT timestamp, seq FROM audit_log ORDER BY seq DESC LIMIT 1",
                [],
                |row| {
                    let timestamp: String = row.get(0)?;
                    let seq: i64 = row.get(1)?;
                    Ok(AuditCursor {
                        timestamp: parse_timestamp(0, &timestamp)?,
                        seq: seq as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let seq: i64 = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let entry_type: String = row.get(2)?;
    let outcome: String = row.get(6)?;
    let detail: Option<String> = row.get(7)?;
    let duration_us: i64 = row.get(8)?;

    let outcome = match outcome.as_str() {
        "success" => AuditOutcome::Success { degraded: detail },
        _ => AuditOutcome::Failure {
            reason: detail.unwrap_or_default(),
        },
    };

    Ok(AuditRecord {
        seq: seq as u64,
        entry: AuditLogEntry {
            timestamp: parse_timestamp(1, &timestamp)?,
            entry_type: entry_type
                .parse::<AuditEntryType>()
                .map_err(|e| conversion_error(2, e))?,
            resource: row.get(3)?,
            target: row.get(4)?,
            actor: row.get(5)?,
            outcome,
            duration_us: duration_us as u64,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn record(
        seq: u64,
        entry_type: AuditEntryType,
        resource: &str,
        outcome: AuditOutcome,
    ) -> AuditRecord {
        let entry = AuditLogEntry::new(
            entry_type,
            resource,
            "alice",
            outcome,
            Duration::from_micros(42),
        );
        AuditRecord { seq, entry }
    }

    #[tokio::test]
    async fn append_and_query_preserves_fields() {
        let sink = SqliteAuditSink::open_in_memory().unwrap();
        let degraded = AuditOutcome::Success {
            degraded: Some("0 of 1 replicas acknowledged".into()),
        };
        let rename = record(1, AuditEntryType::Rename, "old", degraded.clone());
        let rename = AuditRecord {
            entry: rename.entry.with_target("new"),
            ..rename
        };
        sink.append(&rename).await.unwrap();
        sink.append(&record(
            2,
            AuditEntryType::Read,
            "c1:k1",
            AuditOutcome::Failure {
                reason: "not found".into(),
            },
        ))
        .await
        .unwrap();

        let all = sink.query(&AuditFilter::default(), None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].entry.target.as_deref(), Some("new"));
        assert_eq!(all[0].entry.outcome, degraded);
        assert_eq!(all[0].entry.duration_us, 42);
        assert_eq!(
            all[1].entry.outcome,
            AuditOutcome::Failure {
                reason: "not found".into()
            }
        );

        let by_target = sink
            .query(&AuditFilter::resource("new"), None, 10)
            .await
            .unwrap();
        assert_eq!(by_target.len(), 1);
        let by_type = sink
            .query(&AuditFilter::entry_type(AuditEntryType::Read), None, 10)
            .await
            .unwrap();
        assert_eq!(by_type[0].seq, 2);
    }

    #[tokio::test]
    async fn duplicate_seq_is_ignored() {
        let sink = SqliteAuditSink::open_in_memory().unwrap();
        let r = record(7, AuditEntryType::Write, "c1", AuditOutcome::success());
        sink.append(&r).await.unwrap();
        sink.append(&r).await.unwrap();
        let stored = sink.query(&AuditFilter::default(), None, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(sink.last_cursor().await.unwrap().map(|c| c.seq), Some(7));
    }

    #[tokio::test]
    async fn cursor_pages_through_equal_timestamps() {
        let sink = SqliteAuditSink::open_in_memory().unwrap();
        let ts = Utc::now();
        for seq in 1..=4 {
            let mut r = record(seq, AuditEntryType::Exists, "c1", AuditOutcome::success());
            r.entry.timestamp = ts;
            sink.append(&r).await.unwrap();
        }
        let first = sink.query(&AuditFilter::default(), None, 2).await.unwrap();
        let next = sink
            .query(&AuditFilter::default(), Some(&first[1].cursor()), 2)
            .await
            .unwrap();
        assert_eq!(next.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[tokio::test]
    async fn reopening_keeps_history() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("audit.db");
        {
            let sink = SqliteAuditSink::open(&path).unwrap();
            sink.append(&record(1, AuditEntryType::Write, "c1", AuditOutcome::success()))
                .await
                .unwrap();
        }
        let sink = SqliteAuditSink::open(&path).unwrap();
        assert_eq!(sink.last_cursor().await.unwrap().map(|c| c.seq), Some(1));
    }
}
