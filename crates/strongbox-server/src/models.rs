use axum::Json;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use strongbox_core::audit::{AuditCursor, AuditEntryType, AuditRecord, AuditStats};
use strongbox_core::types::{ContainerPath, NodeRole, ObjectRecord, Tags};
use strongbox_core::{ErrorKind, ErrorResponse};
use strongbox_engine::Completed;
use strongbox_replication::{NodeStatus, ReplicationOutcome};

use crate::error::ApiError;

/// Prefix of the headers carrying resource tags, e.g. `x-strongbox-tag-owner`.
pub const TAG_HEADER_PREFIX: &str = "x-strongbox-tag-";
/// Set on committed mutations that missed their replication target.
pub const WARNING_HEADER: &str = "x-strongbox-warning";
pub const SIZE_HEADER: &str = "x-strongbox-size";
pub const CREATED_HEADER: &str = "x-strongbox-created";
pub const MODIFIED_HEADER: &str = "x-strongbox-modified";
pub const KEY_ID_HEADER: &str = "x-strongbox-key-id";

/// Query flags accepted on `/v1/{resource}`.
#[derive(Debug, Default, Deserialize)]
pub struct ResourceParams {
    /// GET on a container returns its metadata instead of its listing.
    pub meta: Option<String>,
    /// DELETE on a container removes its objects too.
    pub cascade: Option<String>,
    /// PUT on a container replaces its settings from a JSON body.
    pub config: Option<String>,
    /// PUT on an object replaces its tags from a JSON body.
    pub tags: Option<String>,
    /// POST on a container renames it to this path.
    pub rename: Option<String>,
    /// PATCH on an object writes the body at this offset.
    pub offset: Option<u64>,
}

/// A present query flag is on unless spelled `false` or `0`.
pub fn flag(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| v != "false" && v != "0")
}

#[derive(Debug, Serialize)]
pub struct MutationResponse<T> {
    pub result: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<ErrorResponse>,
}

/// Serialize a committed mutation. A degraded outcome keeps the success
/// status and gains a warning.
pub fn committed<T: Serialize>(done: Completed<T>) -> Response {
    let warning = done.warning();
    let message = warning.as_ref().map(|w| w.message.clone());
    let mut response = (
        StatusCode::OK,
        Json(MutationResponse {
            result: done.value,
            replication: done.replication,
            warning,
        }),
    )
        .into_response();
    if let Some(value) = message.and_then(|m| HeaderValue::from_str(&m).ok()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(WARNING_HEADER), value);
    }
    response
}

/// Tags supplied as `x-strongbox-tag-<name>` headers.
pub fn tags_from_headers(headers: &HeaderMap) -> Tags {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let tag = name.as_str().strip_prefix(TAG_HEADER_PREFIX)?;
            let value = value.to_str().ok()?;
            (!tag.is_empty()).then(|| (tag.to_string(), value.to_string()))
        })
        .collect()
}

/// Mirror of [`tags_from_headers`]. Tags that cannot be a header are left out.
pub fn insert_tag_headers(headers: &mut HeaderMap, tags: &Tags) {
    for (tag, value) in tags {
        let name = HeaderName::from_bytes(format!("{TAG_HEADER_PREFIX}{tag}").as_bytes());
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}

/// Metadata headers shared by GET and HEAD on an object.
pub fn insert_record_headers(headers: &mut HeaderMap, record: &ObjectRecord) {
    let pairs = [
        ("etag", format!("\"{}\"", record.etag)),
        (SIZE_HEADER, record.size.to_string()),
        (CREATED_HEADER, record.created_at.to_rfc3339()),
        (MODIFIED_HEADER, record.modified_at.to_rfc3339()),
        (KEY_ID_HEADER, record.encryption.key_id.clone()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    insert_tag_headers(headers, &record.tags);
}

/// Parse a single `bytes=first-last` range into `(offset, length)`.
///
/// Open-ended and suffix forms are not served: the length must be known
/// before the object is locked.
pub fn parse_range(value: &str) -> Result<(u64, u64), ApiError> {
    let unsupported =
        || ApiError::new(ErrorKind::InvalidRange, format!("unsupported range '{value}'"));
    let spec = value.trim().strip_prefix("bytes=").ok_or_else(unsupported)?;
    let (first, last) = spec.split_once('-').ok_or_else(unsupported)?;
    let first: u64 = first.trim().parse().map_err(|_| unsupported())?;
    let last: u64 = last.trim().parse().map_err(|_| unsupported())?;
    if last < first {
        return Err(unsupported());
    }
    let length = (last - first).checked_add(1).ok_or_else(unsupported)?;
    Ok((first, length))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MaintenanceState {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub resource: Option<String>,
    pub entry_type: Option<AuditEntryType>,
    /// Resume strictly after this cursor (both parts required).
    pub after_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub after_seq: Option<u64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AuditPage {
    pub records: Vec<AuditRecord>,
    /// Cursor of the last record, present when the page is full.
    pub next: Option<AuditCursor>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub node_id: u64,
    pub role: NodeRole,
    pub maintenance: bool,
    pub key_id: String,
    pub replication_factor: u32,
    pub nodes: Vec<NodeStatus>,
    pub audit: AuditStats,
}

#[derive(Debug, Serialize)]
pub struct ReplicaHealth {
    pub node_id: u64,
    pub role: NodeRole,
}

#[derive(Debug, Serialize)]
pub struct Renamed {
    pub from: ContainerPath,
    pub to: ContainerPath,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_ranges_become_offset_and_length() {
        assert_eq!(parse_range("bytes=0-0").unwrap(), (0, 1));
        assert_eq!(parse_range("bytes=1-3").unwrap(), (1, 3));
        assert_eq!(parse_range(" bytes=10-19 ").unwrap(), (10, 10));
    }

    #[test]
    fn other_range_forms_are_rejected() {
        let rejected = [
            "bytes=5-",
            "bytes=-5",
            "bytes=3-1",
            "items=0-1",
            "bytes=a-b",
            "bytes=0-18446744073709551615",
        ];
        for value in rejected {
            let err = parse_range(value).unwrap_err();
            assert_eq!(err.0.code, ErrorKind::InvalidRange.code(), "{value}");
        }
    }

    #[test]
    fn tags_travel_as_headers() {
        let mut headers = HeaderMap::new();
        let tags = Tags::from([
            ("owner".to_string(), "ops".to_string()),
            ("tier".to_string(), "gold".to_string()),
        ]);
        insert_tag_headers(&mut headers, &tags);
        headers.insert("x-strongbox-actor", HeaderValue::from_static("alice"));
        assert_eq!(tags_from_headers(&headers), tags);
    }

    #[test]
    fn flags() {
        assert!(!flag(&None));
        assert!(flag(&Some(String::new())));
        assert!(flag(&Some("true".into())));
        assert!(!flag(&Some("false".into())));
        assert!(!flag(&Some("0".into())));
    }
}
