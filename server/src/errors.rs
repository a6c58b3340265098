//! Domain error taxonomy and the single HTTP boundary mapping (§7, §4.18).
//! Every fallible service operation returns `Result<T, DomainError>`;
//! protocol-level failures from the wire clients are normalized into this
//! enum at the service boundary rather than leaked past it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("too many requests")]
    TooManyRequests,
    #[error("upstream error: {0}")]
    BadGateway(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Cancelled => StatusCode::from_u16(499).unwrap(),
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Cancelled => "cancelled",
            Self::TooManyRequests => "too_many_requests",
            Self::BadGateway(_) => "bad_gateway",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for DomainError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }
        let body = json!({
            "detail": self.to_string(),
            "error": self.code(),
        });
        (status, axum::Json(body)).into_response()
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
