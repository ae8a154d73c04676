use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use ulid::Ulid;

use crate::http::AppState;
use crate::http::error::ApiError;
use crate::model::Actor;

pub const CUSTOMER_HEADER: &str = "x-customer-id";

/// Who may act as the business.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Expected bearer token. `None` treats unidentified callers as the
    /// business (development mode).
    pub business_token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("business_token", &self.business_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl AuthConfig {
    /// Resolve the caller from request headers.
    ///
    /// 1. `Authorization: Bearer <business token>` is the business.
    /// 2. `X-Customer-Id: <ulid>` is that customer.
    /// 3. Anyone else is the business in development mode and refused otherwise.
    pub fn resolve(&self, headers: &HeaderMap) -> Result<Actor, ApiError> {
        let bearer = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        if let (Some(expected), Some(token)) = (&self.business_token, bearer) {
            if token == expected {
                return Ok(Actor::Business);
            }
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(ApiError::Unauthorized("invalid token"));
        }

        if let Some(raw) = headers.get(CUSTOMER_HEADER) {
            let id = raw
                .to_str()
                .ok()
                .and_then(|s| Ulid::from_string(s.trim()).ok())
                .ok_or_else(|| ApiError::BadRequest("X-Customer-Id is not a valid id".into()))?;
            return Ok(Actor::Customer(id));
        }

        match self.business_token {
            None => Ok(Actor::Business),
            Some(_) => Err(ApiError::Unauthorized("missing credentials")),
        }
    }
}

impl FromRequestParts<AppState> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state.auth.resolve(&parts.headers)
    }
}

/// Refuse customers on business-only operations.
pub fn require_business(actor: Actor) -> Result<(), ApiError> {
    match actor {
        Actor::Business => Ok(()),
        Actor::Customer(_) => Err(ApiError::Forbidden("only the business may do this")),
    }
}
