use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use ulid::Ulid;

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

impl ApiError {
    /// Convert an engine failure, logging backing-store errors with the ids
    /// involved. Callers only ever see a generic message for those.
    pub fn engine(err: EngineError, business_id: Ulid, entity_id: Option<Ulid>) -> Self {
        if err.is_persistence() {
            tracing::error!(%business_id, entity_id = ?entity_id, error = %err, "persistence failure");
        }
        ApiError::Engine(err)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::Validation(_)
                | EngineError::LimitExceeded(_)
                | EngineError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
                EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::Conflict(_) => StatusCode::CONFLICT,
                EngineError::WalError(_) | EngineError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ApiError::Engine(EngineError::Validation(_)) | ApiError::BadRequest(_) => "invalid",
            ApiError::Engine(EngineError::LimitExceeded(_)) => "limit",
            ApiError::Engine(EngineError::InvalidTransition { .. }) => "invalid_state",
            ApiError::Engine(EngineError::NotFound { .. }) => "not_found",
            ApiError::Engine(EngineError::Conflict(_)) => "conflict",
            ApiError::Engine(EngineError::WalError(_) | EngineError::Catalog(_)) => "internal",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::RateLimited { .. } => "rate_limited",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Engine(e) => match e {
                EngineError::Validation(_) | EngineError::LimitExceeded(_) => "Validation error",
                EngineError::InvalidTransition { .. } => "Invalid state transition",
                EngineError::NotFound { .. } => "Not found or no access",
                EngineError::Conflict(_) => "The requested time is no longer available",
                EngineError::WalError(_) | EngineError::Catalog(_) => "An internal server error occurred",
            },
            ApiError::BadRequest(_) => "Bad request",
            ApiError::Unauthorized(_) => "Authentication failed",
            ApiError::Forbidden(_) => "Access denied",
            ApiError::RateLimited { .. } => "Too many requests",
        };
        let details = match &self {
            ApiError::Engine(e) if e.is_persistence() => "internal error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "details": details,
            }
        }));
        let mut response = (status, body).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
