use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use strongbox_core::StoreError;
use strongbox_core::types::{ContainerPath, ObjectKey, Tags};
use strongbox_engine::{ObjectData, RequestContext};

use crate::error::ApiResult;
use crate::models::{
    ResourceParams, committed, flag, insert_record_headers, parse_range, tags_from_headers,
};
use crate::state::AppState;

/// GET returns the payload, or the requested slice of it for a `Range` header.
pub async fn get(
    state: &AppState,
    req: &RequestContext,
    container: &ContainerPath,
    key: &ObjectKey,
    headers: &HeaderMap,
) -> ApiResult<Response> {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(parse_range)
        .transpose()?;

    let Some((offset, length)) = range else {
        let data = state.objects.read(req, container, key).await?;
        return Ok(payload_response(StatusCode::OK, data));
    };

    let data = state
        .objects
        .read_range(req, container, key, offset, length)
        .await?;
    let content_range = format!(
        "bytes {offset}-{}/{}",
        offset + length - 1,
        data.record.size
    );
    let mut response = payload_response(StatusCode::PARTIAL_CONTENT, data);
    if let Ok(value) = HeaderValue::from_str(&content_range) {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    Ok(response)
}

fn payload_response(status: StatusCode, data: ObjectData) -> Response {
    let ObjectData { record, data } = data;
    let mut response = (status, data).into_response();
    insert_record_headers(response.headers_mut(), &record);
    response
}

pub async fn head(
    state: &AppState,
    req: &RequestContext,
    container: &ContainerPath,
    key: &ObjectKey,
) -> ApiResult<Response> {
    let Some(record) = state.objects.head(req, container, key).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let mut response = StatusCode::OK.into_response();
    insert_record_headers(response.headers_mut(), &record);
    Ok(response)
}

/// PUT replaces the payload, or with `?tags` replaces only the tags.
pub async fn put(
    state: &AppState,
    req: &RequestContext,
    container: &ContainerPath,
    key: &ObjectKey,
    params: &ResourceParams,
    headers: &HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    if flag(&params.tags) {
        let tags: Tags = serde_json::from_slice(&body)
            .map_err(|e| StoreError::InvalidRequest(format!("object tags: {e}")))?;
        let done = state.objects.write_tags(req, container, key, tags).await?;
        return Ok(committed(done));
    }
    let done = state
        .objects
        .write(req, container, key, &body, tags_from_headers(headers))
        .await?;
    Ok(committed(done))
}

/// PATCH `?offset=<n>` writes the body into the existing payload.
pub async fn patch(
    state: &AppState,
    req: &RequestContext,
    container: &ContainerPath,
    key: &ObjectKey,
    params: &ResourceParams,
    body: Bytes,
) -> ApiResult<Response> {
    let Some(offset) = params.offset else {
        return Err(StoreError::InvalidRequest("PATCH requires ?offset".into()).into());
    };
    let done = state
        .objects
        .write_range(req, container, key, offset, &body)
        .await?;
    Ok(committed(done))
}

pub async fn delete(
    state: &AppState,
    req: &RequestContext,
    container: &ContainerPath,
    key: &ObjectKey,
) -> ApiResult<Response> {
    let done = state.objects.delete(req, container, key).await?;
    Ok(committed(done))
}
