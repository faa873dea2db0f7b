use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::dto::{CreateCommentRequest, CreatePostRequest, PostWithComments, UpdatePostRequest};
use crate::{
    auth::CurrentUser,
    error::{ApiError, ApiResult},
    policy::Decision,
    state::AppState,
    store::{Comment, NewComment, NewPost, Post, PostId, User, UserId},
};

/// Minimum role for editing someone else's post.
const UPDATE_ROLE: &str = "moderator";
/// Minimum role for deleting someone else's post.
const DELETE_ROLE: &str = "admin";

pub fn post_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create_post))
        .route(
            "/posts/:id",
            get(get_post).patch(update_post).delete(delete_post),
        )
        .route("/posts/:id/comments", post(create_comment))
}

async fn ensure_allowed(
    state: &AppState,
    user: &User,
    owner_id: UserId,
    required_role: &str,
) -> ApiResult<()> {
    match state.policy.authorize(user, owner_id, required_role).await? {
        Decision::Allowed => Ok(()),
        Decision::Forbidden => {
            warn!(user_id = user.id, owner_id, required_role, "forbidden");
            Err(ApiError::Forbidden)
        }
    }
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn create_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<CreatePostRequest>,
) -> ApiResult<(StatusCode, Json<Post>)> {
    payload.validate()?;
    let post = state
        .storage
        .posts
        .create(NewPost {
            user_id: user.id,
            title: payload.title,
            content: payload.content,
            tags: payload.tags,
        })
        .await?;
    info!(post_id = post.id, "post created");
    Ok((StatusCode::CREATED, Json(post)))
}

#[instrument(skip(state, _user))]
pub async fn get_post(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<PostId>,
) -> ApiResult<Json<PostWithComments>> {
    let post = state.storage.posts.get_by_id(id).await?;
    let comments = state.storage.comments.list_by_post(id).await?;
    Ok(Json(PostWithComments { post, comments }))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn update_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PostId>,
    Json(payload): Json<UpdatePostRequest>,
) -> ApiResult<Json<Post>> {
    payload.validate()?;
    let mut post = state.storage.posts.get_by_id(id).await?;
    ensure_allowed(&state, &user, post.user_id, UPDATE_ROLE).await?;

    payload.apply(&mut post);
    let updated = state.storage.posts.update(&post).await?;
    info!(post_id = id, version = updated.version, "post updated");
    Ok(Json(updated))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PostId>,
) -> ApiResult<StatusCode> {
    let post = state.storage.posts.get_by_id(id).await?;
    ensure_allowed(&state, &user, post.user_id, DELETE_ROLE).await?;

    state.storage.posts.delete(id).await?;
    info!(post_id = id, "post deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn create_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PostId>,
    Json(payload): Json<CreateCommentRequest>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    payload.validate()?;
    let comment = state
        .storage
        .comments
        .create(NewComment {
            post_id: id,
            user_id: user.id,
            content: payload.content,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}
