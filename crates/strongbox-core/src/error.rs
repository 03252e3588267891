use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::lock::LockMode;

#[derive(Debug, Error)]
pub enum StoreError {
    // Resolution
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid resource key: {0}")]
    InvalidResourceKey(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Concurrency
    #[error("timed out after {waited_ms} ms waiting for {mode} lock on {resource}")]
    LockTimeout {
        resource: String,
        mode: LockMode,
        waited_ms: u64,
    },

    #[error("maintenance mode is active; mutations are rejected")]
    MaintenanceModeActive,

    // Payload
    #[error("range offset={offset} length={length} is outside an object of {size} bytes")]
    InvalidRange { offset: u64, length: u64, size: u64 },

    #[error("payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("container is disabled: {0}")]
    ContainerDisabled(String),

    // Crypto
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    // Backing medium
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Config
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found at {0}")]
    ConfigNotFound(String),

    #[error("TOML deserialization error: {0}")]
    TomlDe(String),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Closed set of error kinds surfaced to callers.
///
/// Codes are part of the wire contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    LockTimeout,
    MaintenanceModeActive,
    InvalidRange,
    DecryptionError,
    ReplicationDegraded,
    InvalidResourceKey,
    ContainerDisabled,
    PayloadTooLarge,
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            ErrorKind::NotFound => 1001,
            ErrorKind::Conflict => 1002,
            ErrorKind::LockTimeout => 1003,
            ErrorKind::MaintenanceModeActive => 1004,
            ErrorKind::InvalidRange => 1005,
            ErrorKind::DecryptionError => 1006,
            ErrorKind::ReplicationDegraded => 1007,
            ErrorKind::InvalidResourceKey => 1008,
            ErrorKind::ContainerDisabled => 1009,
            ErrorKind::PayloadTooLarge => 1010,
            ErrorKind::InvalidRequest => 1011,
            ErrorKind::Internal => 1099,
        }
    }

    /// HTTP-equivalent status code.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::LockTimeout => 423,
            ErrorKind::MaintenanceModeActive => 503,
            ErrorKind::InvalidRange => 416,
            ErrorKind::DecryptionError => 500,
            // Not a failure: the mutation committed.
            ErrorKind::ReplicationDegraded => 200,
            ErrorKind::InvalidResourceKey => 400,
            ErrorKind::ContainerDisabled => 403,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::LockTimeout => "LockTimeout",
            ErrorKind::MaintenanceModeActive => "MaintenanceModeActive",
            ErrorKind::InvalidRange => "InvalidRange",
            ErrorKind::DecryptionError => "DecryptionError",
            ErrorKind::ReplicationDegraded => "ReplicationDegraded",
            ErrorKind::InvalidResourceKey => "InvalidResourceKey",
            ErrorKind::ContainerDisabled => "ContainerDisabled",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::InvalidResourceKey(_) => ErrorKind::InvalidResourceKey,
            StoreError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            StoreError::LockTimeout { .. } => ErrorKind::LockTimeout,
            StoreError::MaintenanceModeActive => ErrorKind::MaintenanceModeActive,
            StoreError::InvalidRange { .. } => ErrorKind::InvalidRange,
            StoreError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            StoreError::ContainerDisabled(_) => ErrorKind::ContainerDisabled,
            StoreError::Decryption(_) => ErrorKind::DecryptionError,
            StoreError::Encryption(_)
            | StoreError::Storage(_)
            | StoreError::Io(_)
            | StoreError::Database(_)
            | StoreError::Serialization(_)
            | StoreError::Config(_)
            | StoreError::ConfigNotFound(_)
            | StoreError::TomlDe(_)
            | StoreError::TomlSer(_)
            | StoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    fn data(&self) -> Option<serde_json::Value> {
        match self {
            StoreError::LockTimeout {
                resource,
                mode,
                waited_ms,
            } => Some(serde_json::json!({
                "resource": resource,
                "mode": mode.to_string(),
                "waited_ms": waited_ms,
            })),
            StoreError::InvalidRange {
                offset,
                length,
                size,
            } => Some(serde_json::json!({
                "offset": offset,
                "length": length,
                "size": size,
            })),
            StoreError::PayloadTooLarge { size, limit } => Some(serde_json::json!({
                "size": size,
                "limit": limit,
            })),
            _ => None,
        }
    }
}

/// Error record handed to the transport layer for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code(),
            status: kind.status(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&StoreError> for ErrorResponse {
    fn from(e: &StoreError) -> Self {
        let kind = e.kind();
        Self {
            code: kind.code(),
            status: kind.status(),
            message: e.to_string(),
            data: e.data(),
        }
    }
}

impl From<StoreError> for ErrorResponse {
    fn from(e: StoreError) -> Self {
        ErrorResponse::from(&e)
    }
}
