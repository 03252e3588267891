pub mod admin;
pub mod containers;
pub mod objects;
pub mod replica;

use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::HeaderMap;
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};
use bytes::Bytes;
use strongbox_core::StoreError;
use strongbox_core::types::ResourceKey;
use strongbox_replication::transport::{APPLY_PATH, HEALTH_PATH};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::error::ApiResult;
use crate::models::ResourceParams;
use crate::state::AppState;

/// Headroom over the payload limit for replica JSON (base64 plus the record).
const BODY_OVERHEAD: usize = 64 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.ctx.config.store.max_object_bytes)
        .unwrap_or(usize::MAX)
        .saturating_mul(2)
        .saturating_add(BODY_OVERHEAD);

    // Containers and objects: `/v1/photos/2024` or `/v1/photos/2024:cat.jpg`
    let data = Router::new()
        .route(
            "/v1/{*resource}",
            get(get_resource)
                .head(head_resource)
                .put(put_resource)
                .patch(patch_resource)
                .post(post_resource)
                .delete(delete_resource),
        )
        .with_state(state.clone());

    // Peer traffic (cluster token)
    let replica = Router::new()
        .route(APPLY_PATH, post(replica::apply))
        .route(HEALTH_PATH, get(replica::health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::cluster_middleware,
        ))
        .with_state(state.clone());

    // Operators (admin token)
    let admin = Router::new()
        .route("/_admin/status", get(admin::get_status))
        .route(
            "/_admin/maintenance",
            get(admin::get_maintenance).put(admin::set_maintenance),
        )
        .route("/_admin/audit", get(admin::query_audit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::admin_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(data)
        .merge(replica)
        .merge(admin)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
}

async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Query(params): Query<ResourceParams>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let req = state.request_context(&headers);
    match ResourceKey::parse(&resource)? {
        ResourceKey::Container(path) => containers::get(&state, &req, &path, &params).await,
        ResourceKey::Object { container, key } => {
            objects::get(&state, &req, &container, &key, &headers).await
        }
    }
}

async fn head_resource(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let req = state.request_context(&headers);
    match ResourceKey::parse(&resource)? {
        ResourceKey::Container(path) => containers::head(&state, &req, &path).await,
        ResourceKey::Object { container, key } => {
            objects::head(&state, &req, &container, &key).await
        }
    }
}

async fn put_resource(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Query(params): Query<ResourceParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let req = state.request_context(&headers);
    match ResourceKey::parse(&resource)? {
        ResourceKey::Container(path) => {
            containers::put(&state, &req, &path, &params, &headers, body).await
        }
        ResourceKey::Object { container, key } => {
            objects::put(&state, &req, &container, &key, &params, &headers, body).await
        }
    }
}

async fn patch_resource(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Query(params): Query<ResourceParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let req = state.request_context(&headers);
    match ResourceKey::parse(&resource)? {
        ResourceKey::Container(_) => Err(StoreError::InvalidRequest(
            "range writes address objects, not containers".into(),
        )
        .into()),
        ResourceKey::Object { container, key } => {
            objects::patch(&state, &req, &container, &key, &params, body).await
        }
    }
}

async fn post_resource(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Query(params): Query<ResourceParams>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let req = state.request_context(&headers);
    match ResourceKey::parse(&resource)? {
        ResourceKey::Container(path) => containers::post(&state, &req, &path, &params).await,
        ResourceKey::Object { .. } => {
            Err(StoreError::InvalidRequest("objects cannot be renamed".into()).into())
        }
    }
}

async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Query(params): Query<ResourceParams>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let req = state.request_context(&headers);
    match ResourceKey::parse(&resource)? {
        ResourceKey::Container(path) => containers::delete(&state, &req, &path, &params).await,
        ResourceKey::Object { container, key } => {
            objects::delete(&state, &req, &container, &key).await
        }
    }
}
