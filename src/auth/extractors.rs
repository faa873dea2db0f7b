use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use crate::{
    error::ApiError,
    state::AppState,
    store::{StoreError, User},
};

/// Authenticated, active user resolved from the bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ApiError::Unauthorized("missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or(ApiError::Unauthorized("invalid auth scheme"))?;

        let claims = state.tokens.validate_token(token)?;
        let user_id = claims.user_id().ok_or_else(|| {
            warn!(sub = %claims.sub, "token subject is not a user id");
            ApiError::InvalidToken("malformed token")
        })?;

        match state.identity.resolve(user_id).await {
            Ok(user) => Ok(CurrentUser(user)),
            Err(StoreError::NotFound) => {
                warn!(user_id, "token for unknown or inactive user");
                Err(ApiError::InvalidToken("unknown or inactive user"))
            }
            Err(e) => Err(e.into()),
        }
    }
}
