use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use strongbox_core::{ErrorKind, ErrorResponse, StoreError};

/// An [`ErrorResponse`] on its way to the client, unchanged.
#[derive(Debug)]
pub struct ApiError(pub ErrorResponse);

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self(ErrorResponse::new(kind, message))
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(ErrorResponse::from(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_the_error_kind() {
        let response = ApiError::from(StoreError::NotFound("container 'c1'".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError::from(StoreError::LockTimeout {
            resource: "c1".into(),
            mode: strongbox_core::lock::LockMode::Shared,
            waited_ms: 5,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::LOCKED);

        let response = ApiError::from(StoreError::MaintenanceModeActive).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
