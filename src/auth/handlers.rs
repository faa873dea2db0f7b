use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{post, put},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{LoginRequest, RegisterRequest, TokenResponse, UserWithToken},
        services,
    },
    error::ApiResult,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/authentication/user", post(register))
        .route("/authentication/token", post(create_token))
        .route("/users/activate/:token", put(activate))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<UserWithToken>)> {
    let (user, token) = services::register(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(UserWithToken { user, token })))
}

#[instrument(skip(state, payload))]
pub async fn create_token(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<(StatusCode, Json<TokenResponse>)> {
    let token = services::authenticate(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

#[instrument(skip_all)]
pub async fn activate(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<StatusCode> {
    services::activate(&state, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}
