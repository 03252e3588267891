use std::time::Duration;

use axum::http::HeaderMap;
use strongbox_engine::{ContainerEngine, ObjectEngine, ReplicaApplier, RequestContext, SharedContext};

/// Header naming the caller recorded in the audit trail.
pub const ACTOR_HEADER: &str = "x-strongbox-actor";
/// Optional per-request lock timeout in milliseconds.
pub const LOCK_TIMEOUT_HEADER: &str = "x-strongbox-lock-timeout-ms";

const ANONYMOUS: &str = "anonymous";

pub struct AppState {
    pub ctx: SharedContext,
    pub containers: ContainerEngine,
    pub objects: ObjectEngine,
    pub replica: ReplicaApplier,
    pub admin_token: Option<String>,
    pub cluster_token: Option<String>,
}

impl AppState {
    pub fn new(ctx: SharedContext, admin_token: Option<String>) -> Self {
        Self {
            containers: ContainerEngine::new(ctx.clone()),
            objects: ObjectEngine::new(ctx.clone()),
            replica: ReplicaApplier::new(ctx.clone()),
            cluster_token: ctx.config.replication.cluster_token.clone(),
            admin_token,
            ctx,
        }
    }

    /// Build the per-call context from request headers.
    pub fn request_context(&self, headers: &HeaderMap) -> RequestContext {
        let actor = headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(ANONYMOUS);
        let lock_timeout = headers
            .get(LOCK_TIMEOUT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.ctx.config.store.lock_timeout());
        RequestContext::new(actor, lock_timeout)
    }
}
