use axum::Json;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use strongbox_core::StoreError;
use strongbox_core::types::{ContainerPath, ContainerSettings};
use strongbox_engine::{DeleteMode, RequestContext};

use crate::error::ApiResult;
use crate::models::{
    CREATED_HEADER, Renamed, ResourceParams, committed, flag, insert_tag_headers, tags_from_headers,
};
use crate::state::AppState;

pub async fn get(
    state: &AppState,
    req: &RequestContext,
    path: &ContainerPath,
    params: &ResourceParams,
) -> ApiResult<Response> {
    if flag(&params.meta) {
        let container = state.containers.read(req, path).await?;
        return Ok(Json(container).into_response());
    }
    let listing = state.containers.enumerate(req, path).await?;
    Ok(Json(listing).into_response())
}

pub async fn head(
    state: &AppState,
    req: &RequestContext,
    path: &ContainerPath,
) -> ApiResult<Response> {
    let Some(container) = state.containers.head(req, path).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    if let Ok(created) = HeaderValue::from_str(&container.created_at.to_rfc3339()) {
        headers.insert(HeaderName::from_static(CREATED_HEADER), created);
    }
    insert_tag_headers(headers, &container.tags);
    Ok(response)
}

/// PUT creates or retags the container, or with `?config` replaces its settings.
pub async fn put(
    state: &AppState,
    req: &RequestContext,
    path: &ContainerPath,
    params: &ResourceParams,
    headers: &HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    if flag(&params.config) {
        let settings: ContainerSettings = serde_json::from_slice(&body)
            .map_err(|e| StoreError::InvalidRequest(format!("container settings: {e}")))?;
        let done = state.containers.configure(req, path, settings).await?;
        return Ok(committed(done));
    }
    let done = state
        .containers
        .write(req, path, tags_from_headers(headers))
        .await?;
    Ok(committed(done))
}

/// POST `?rename=<path>` moves the container with everything in it.
pub async fn post(
    state: &AppState,
    req: &RequestContext,
    path: &ContainerPath,
    params: &ResourceParams,
) -> ApiResult<Response> {
    let Some(to) = params.rename.as_deref() else {
        return Err(
            StoreError::InvalidRequest("POST on a container requires ?rename".into()).into(),
        );
    };
    let to = ContainerPath::parse(to)?;
    let done = state.containers.rename(req, path, &to).await?;
    Ok(committed(done.map(|()| Renamed {
        from: path.clone(),
        to,
    })))
}

pub async fn delete(
    state: &AppState,
    req: &RequestContext,
    path: &ContainerPath,
    params: &ResourceParams,
) -> ApiResult<Response> {
    let mode = if flag(&params.cascade) {
        DeleteMode::Cascade
    } else {
        DeleteMode::Reject
    };
    let done = state.containers.delete(req, path, mode).await?;
    Ok(committed(done))
}
