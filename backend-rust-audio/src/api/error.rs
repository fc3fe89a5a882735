use audio_vault_core::{ErrorKind, VaultError};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

/// Handler error: a vault error rendered as `{status: "error", message}`.
#[derive(Debug)]
pub struct ApiError(pub VaultError);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError(VaultError::Validation(message.into()))
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
        ErrorKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }

        let mut resp = (
            status,
            Json(ErrorResponse {
                status: "error",
                message: self.0.to_string(),
            }),
        )
            .into_response();

        if let VaultError::RangeNotSatisfiable { size } = self.0 {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                resp.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        resp
    }
}
