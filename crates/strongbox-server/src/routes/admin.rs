use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use futures::{StreamExt, TryStreamExt};
use strongbox_core::StoreError;
use strongbox_core::audit::{AuditCursor, AuditFilter, AuditRecord};
use tracing::warn;

use crate::error::ApiResult;
use crate::models::{AuditPage, AuditQuery, MaintenanceState, StatusResponse};
use crate::state::AppState;

const DEFAULT_AUDIT_PAGE: usize = 100;
const MAX_AUDIT_PAGE: usize = 1_000;

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let ctx = &state.ctx;
    let topology = ctx.replication.topology();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        node_id: topology.local_id(),
        role: topology.local_role(),
        maintenance: ctx.maintenance.is_maintenance(),
        key_id: ctx.crypto.current_key_id().to_string(),
        replication_factor: topology.replication_factor(),
        nodes: topology.health_view(),
        audit: ctx.audit.stats(),
    })
}

pub async fn get_maintenance(State(state): State<Arc<AppState>>) -> Json<MaintenanceState> {
    Json(MaintenanceState {
        enabled: state.ctx.maintenance.is_maintenance(),
    })
}

pub async fn set_maintenance(
    State(state): State<Arc<AppState>>,
    Json(desired): Json<MaintenanceState>,
) -> Json<MaintenanceState> {
    if desired.enabled {
        state.ctx.maintenance.enter();
        warn!("maintenance mode entered; mutations are rejected");
    } else {
        state.ctx.maintenance.exit();
        warn!("maintenance mode left");
    }
    Json(MaintenanceState {
        enabled: state.ctx.maintenance.is_maintenance(),
    })
}

/// One page of the audit trail, oldest first.
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<AuditPage>> {
    let after = match (query.after_timestamp, query.after_seq) {
        (Some(timestamp), Some(seq)) => Some(AuditCursor { timestamp, seq }),
        (None, None) => None,
        _ => {
            return Err(StoreError::InvalidRequest(
                "after_timestamp and after_seq must be given together".into(),
            )
            .into());
        }
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_PAGE)
        .clamp(1, MAX_AUDIT_PAGE);
    let filter = AuditFilter {
        resource: query.resource,
        entry_type: query.entry_type,
    };

    // Entries recorded before this request must be visible to it.
    state.ctx.audit.flush().await;
    let records: Vec<AuditRecord> = state
        .ctx
        .audit
        .entries_after(filter, after)
        .take(limit)
        .try_collect()
        .await?;
    let next = if records.len() == limit {
        records.last().map(AuditRecord::cursor)
    } else {
        None
    };
    Ok(Json(AuditPage { records, next }))
}
