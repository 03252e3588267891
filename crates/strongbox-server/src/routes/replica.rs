use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use strongbox_replication::ReplicatedMutation;

use crate::error::ApiResult;
use crate::models::ReplicaHealth;
use crate::state::AppState;

/// Intake for mutations propagated by the primary. Any non-2xx answer
/// counts as a missed acknowledgment on the sending side.
pub async fn apply(
    State(state): State<Arc<AppState>>,
    Json(mutation): Json<ReplicatedMutation>,
) -> ApiResult<StatusCode> {
    state.replica.apply_mutation(mutation).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<ReplicaHealth> {
    let topology = state.ctx.replication.topology();
    Json(ReplicaHealth {
        node_id: topology.local_id(),
        role: topology.local_role(),
    })
}
