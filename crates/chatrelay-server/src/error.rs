use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use chatrelay_core::error::{RelayError, UpstreamError};

/// Application error type that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Relay(RelayError),
    NotFound(String),
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        AppError::Relay(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Relay(RelayError::Upstream(upstream)) => upstream_status(upstream),
        }
    }

    /// Human-readable message for the response body.
    pub fn message(&self) -> String {
        match self {
            AppError::BadRequest(msg) | AppError::NotFound(msg) => msg.clone(),
            AppError::Relay(RelayError::Upstream(upstream)) => upstream.user_message(),
        }
    }
}

fn upstream_status(err: &UpstreamError) -> StatusCode {
    match err {
        UpstreamError::Http { status, .. } => StatusCode::from_u16(*status)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY),
        UpstreamError::SafetyBlocked { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        UpstreamError::EmptyBody
        | UpstreamError::Transport(_)
        | UpstreamError::InvalidResponse(_)
        | UpstreamError::MalformedFragment { .. }
        | UpstreamError::EmptyCandidate => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }
        let body = json!({ "error": self.message() });
        (status, axum::Json(body)).into_response()
    }
}
