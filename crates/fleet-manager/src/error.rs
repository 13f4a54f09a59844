//! HTTP error responses.

use crate::queue::CompletionError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fleet_core::{Error, ErrorKind};
use serde::Serialize;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
}

fn core_status(err: &Error) -> StatusCode {
    match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidConfig | ErrorKind::Serialization => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidTransition | ErrorKind::LeaseHeld => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(e) | ApiError::Completion(CompletionError::Core(e)) => core_status(e),
            ApiError::Completion(CompletionError::NotTerminal(_)) => StatusCode::BAD_REQUEST,
            ApiError::Completion(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    fn kind(&self) -> Option<ErrorKind> {
        match self {
            ApiError::Core(e) | ApiError::Completion(CompletionError::Core(e)) => Some(e.kind()),
            ApiError::Completion(_) => Some(ErrorKind::InvalidTransition),
            ApiError::BadRequest(_) => Some(ErrorKind::InvalidConfig),
            ApiError::Forbidden(_) => Some(ErrorKind::Unauthorized),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}

/// Parse a path or query identifier.
pub fn parse_id<T: std::str::FromStr>(value: &str, what: &str) -> ApiResult<T> {
    value
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {} ID", what)))
}
