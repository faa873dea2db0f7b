//! Boundary error: the one place component error kinds become HTTP statuses.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    auth::{jwt::TokenError, password::PasswordError},
    policy::PolicyError,
    store::{FeedQueryError, StoreError},
};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    /// A bearer token was presented but rejected.
    #[error("{0}")]
    InvalidToken(&'static str),
    #[error("forbidden")]
    Forbidden,
    #[error("resource not found")]
    NotFound,
    #[error("{0}")]
    Conflict(&'static str),
    #[error("rate limit exceeded")]
    RateLimited(Duration),
    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) | ApiError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(details) => {
                error!(%details, "internal error");
                "the server encountered a problem and could not process your request".to_string()
            }
            other => other.to_string(),
        };
        let mut res = (status, Json(json!({ "error": message }))).into_response();
        match self {
            ApiError::RateLimited(retry_after) => {
                // Round up so clients never retry before the window resets.
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                res.headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
            }
            ApiError::InvalidToken(description) => {
                let challenge =
                    format!(r#"Bearer error="invalid_token", error_description="{description}""#);
                if let Ok(value) = HeaderValue::from_str(&challenge) {
                    res.headers_mut().insert(header::WWW_AUTHENTICATE, value);
                }
            }
            ApiError::Unauthorized(_) => {
                res.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        res
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        if e.is_internal() {
            return ApiError::Internal(e.to_string());
        }
        match e {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::DuplicateEmail => ApiError::Conflict("a user with that email already exists"),
            StoreError::DuplicateUsername => {
                ApiError::Conflict("a user with that username already exists")
            }
            StoreError::DuplicateKey => ApiError::Conflict("resource already exists"),
            StoreError::Conflict => ApiError::Conflict("resource was modified concurrently"),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        warn!(error = %e, "token rejected");
        match e {
            TokenError::Expired => ApiError::InvalidToken("token expired"),
            TokenError::NotYetValid => ApiError::InvalidToken("token not yet valid"),
            TokenError::InvalidSignature => ApiError::InvalidToken("invalid token signature"),
            TokenError::Malformed => ApiError::InvalidToken("malformed token"),
            TokenError::Signing(details) => ApiError::Internal(details),
        }
    }
}

impl From<PolicyError> for ApiError {
    fn from(e: PolicyError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<FeedQueryError> for ApiError {
    fn from(e: FeedQueryError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<PasswordError> for ApiError {
    fn from(e: PasswordError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
