mod logger;
mod sqlite;

pub use logger::{AuditLogger, AuditStats};
pub use sqlite::SqliteAuditSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Operation recorded by an audit entry. Serialized as its literal name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEntryType {
    Enumerate,
    Read,
    ReadRange,
    Write,
    WriteRange,
    WriteTags,
    Delete,
    Rename,
    Exists,
    Configuration,
}

impl AuditEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntryType::Enumerate => "Enumerate",
            AuditEntryType::Read => "Read",
            AuditEntryType::ReadRange => "ReadRange",
            AuditEntryType::Write => "Write",
            AuditEntryType::WriteRange => "WriteRange",
            AuditEntryType::WriteTags => "WriteTags",
            AuditEntryType::Delete => "Delete",
            AuditEntryType::Rename => "Rename",
            AuditEntryType::Exists => "Exists",
            AuditEntryType::Configuration => "Configuration",
        }
    }

    pub fn is_mutation(&self) -> bool {
        match self {
            AuditEntryType::Write
            | AuditEntryType::WriteRange
            | AuditEntryType::WriteTags
            | AuditEntryType::Delete
            | AuditEntryType::Rename
            | AuditEntryType::Configuration => true,
            AuditEntryType::Enumerate
            | AuditEntryType::Read
            | AuditEntryType::ReadRange
            | AuditEntryType::Exists => false,
        }
    }
}

impl fmt::Display for AuditEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditEntryType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let entry_type = match s {
            "Enumerate" => AuditEntryType::Enumerate,
            "Read" => AuditEntryType::Read,
            "ReadRange" => AuditEntryType::ReadRange,
            "Write" => AuditEntryType::Write,
            "WriteRange" => AuditEntryType::WriteRange,
            "WriteTags" => AuditEntryType::WriteTags,
            "Delete" => AuditEntryType::Delete,
            "Rename" => AuditEntryType::Rename,
            "Exists" => AuditEntryType::Exists,
            "Configuration" => AuditEntryType::Configuration,
            other => return Err(StoreError::Internal(format!("unknown audit entry type '{other}'"))),
        };
        Ok(entry_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AuditOutcome {
    /// `degraded` is set when fewer replicas than required acknowledged.
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        degraded: Option<String>,
    },
    Failure { reason: String },
}

impl AuditOutcome {
    pub fn success() -> Self {
        AuditOutcome::Success { degraded: None }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AuditOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub entry_type: AuditEntryType,
    /// Text form of the resource key the operation addressed.
    pub resource: String,
    /// Destination of a rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub duration_us: u64,
}

impl AuditLogEntry {
    pub fn new(
        entry_type: AuditEntryType,
        resource: impl Into<String>,
        actor: impl Into<String>,
        outcome: AuditOutcome,
        duration: Duration,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            entry_type,
            resource: resource.into(),
            target: None,
            actor: actor.into(),
            outcome,
            duration_us: u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// An entry as persisted, with its position in the trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: u64,
    #[serde(flatten)]
    pub entry: AuditLogEntry,
}

impl AuditRecord {
    pub fn cursor(&self) -> AuditCursor {
        AuditCursor {
            timestamp: self.entry.timestamp,
            seq: self.seq,
        }
    }
}

/// Resume point for enumeration: everything strictly after this position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuditCursor {
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    /// Matches the addressed resource or a rename target.
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub entry_type: Option<AuditEntryType>,
}

impl AuditFilter {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            entry_type: None,
        }
    }

    pub fn entry_type(entry_type: AuditEntryType) -> Self {
        Self {
            resource: None,
            entry_type: Some(entry_type),
        }
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        let resource_ok = match &self.resource {
            Some(r) => entry.resource == *r || entry.target.as_deref() == Some(r.as_str()),
            None => true,
        };
        let type_ok = self.entry_type.is_none_or(|t| t == entry.entry_type);
        resource_ok && type_ok
    }
}

/// Durable destination of audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one record. Appending a `seq` that is already stored is a no-op.
    async fn append(&self, record: &AuditRecord) -> Result<()>;

    /// Records matching `filter` strictly after `after`, in (timestamp, seq) order.
    async fn query(
        &self,
        filter: &AuditFilter,
        after: Option<&AuditCursor>,
        limit: usize,
    ) -> Result<Vec<AuditRecord>>;

    /// Position of the newest stored record.
    async fn last_cursor(&self) -> Result<Option<AuditCursor>>;
}

/// Audit sink kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if !records.iter().any(|r| r.seq == record.seq) {
            records.push(record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        after: Option<&AuditCursor>,
        limit: usize,
    ) -> Result<Vec<AuditRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<AuditRecord> = records
            .iter()
            .filter(|r| filter.matches(&r.entry))
            .filter(|r| after.is_none_or(|c| r.cursor() > *c))
            .cloned()
            .collect();
        matching.sort_by_key(AuditRecord::cursor);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn last_cursor(&self) -> Result<Option<AuditCursor>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().map(AuditRecord::cursor).max())
    }
}
