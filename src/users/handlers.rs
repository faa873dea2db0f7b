use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::CurrentUser,
    error::{ApiError, ApiResult},
    state::AppState,
    store::{FeedParams, FeedQuery, PostWithMetadata, User, UserId},
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/feed", get(get_feed))
        .route("/users/:id", get(get_user))
        .route("/users/:id/follow", put(follow_user))
        .route("/users/:id/unfollow", put(unfollow_user))
}

#[instrument(skip(state, _viewer))]
pub async fn get_user(
    State(state): State<AppState>,
    _viewer: CurrentUser,
    Path(id): Path<UserId>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.identity.resolve(id).await?))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn follow_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(target): Path<UserId>,
) -> ApiResult<StatusCode> {
    if target == user.id {
        return Err(ApiError::BadRequest("cannot follow yourself".into()));
    }
    state.storage.followers.follow(user.id, target).await?;
    info!(target, "followed");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn unfollow_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(target): Path<UserId>,
) -> ApiResult<StatusCode> {
    state.storage.followers.unfollow(user.id, target).await?;
    info!(target, "unfollowed");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user, params), fields(user_id = user.id))]
pub async fn get_feed(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<FeedParams>,
) -> ApiResult<Json<Vec<PostWithMetadata>>> {
    let query = FeedQuery::try_from(params)?;
    let feed = state.storage.posts.feed(user.id, &query).await?;
    Ok(Json(feed))
}
