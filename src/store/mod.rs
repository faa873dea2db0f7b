//! Durable storage: repository traits, their Postgres backend, and an
//! in-memory double with the same transactional guarantees.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use sqlx::PgPool;

pub mod error;
pub mod invitation;
#[cfg(test)]
pub mod memory;
pub mod pagination;
pub mod postgres;
pub mod repo_types;

pub use error::{Result, StoreError};
pub use pagination::{FeedParams, FeedQuery, FeedQueryError, SortOrder};
pub use repo_types::{
    Comment, NewComment, NewPost, NewUser, Post, PostId, PostWithMetadata, Role, User, UserId,
};

/// Role assigned when registration does not name one.
pub const DEFAULT_ROLE: &str = "user";

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Active user with role. Inactive or missing users are `NotFound`.
    async fn get_by_id(&self, id: UserId) -> Result<User>;
    /// Active user with password hash, for login.
    async fn get_by_email(&self, email: &str) -> Result<User>;
    /// Inserts an inactive user and its invitation digest in one transaction.
    async fn create_and_invite(
        &self,
        user: NewUser,
        token_digest: &str,
        ttl: time::Duration,
    ) -> Result<User>;
    /// Consumes the invitation matching `plain_token` and activates its user.
    async fn activate(&self, plain_token: &str) -> Result<()>;
    /// Removes the user and any outstanding invitation, whatever its state.
    async fn delete(&self, id: UserId) -> Result<()>;
    /// Deletes never-activated users whose invitation expired. Returns how many.
    async fn purge_expired_invitations(&self) -> Result<u64>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Role>;
}

#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn create(&self, post: NewPost) -> Result<Post>;
    async fn get_by_id(&self, id: PostId) -> Result<Post>;
    /// Conditional write on `(post.id, post.version)`. Returns the fresh row.
    /// `Conflict` if the post exists at another version, `NotFound` if gone.
    async fn update(&self, post: &Post) -> Result<Post>;
    /// Deletes the post and its comments together.
    async fn delete(&self, id: PostId) -> Result<()>;
    async fn feed(&self, user_id: UserId, query: &FeedQuery) -> Result<Vec<PostWithMetadata>>;
}

#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn create(&self, comment: NewComment) -> Result<Comment>;
    /// Newest comments first, capped at ten.
    async fn list_by_post(&self, post_id: PostId) -> Result<Vec<Comment>>;
}

#[async_trait]
pub trait FollowerRepository: Send + Sync {
    async fn follow(&self, follower_id: UserId, followed_id: UserId) -> Result<()>;
    async fn unfollow(&self, follower_id: UserId, followed_id: UserId) -> Result<()>;
}

/// Repository handles injected into the application state.
#[derive(Clone)]
pub struct Storage {
    pub users: Arc<dyn UserRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub posts: Arc<dyn PostRepository>,
    pub comments: Arc<dyn CommentRepository>,
    pub followers: Arc<dyn FollowerRepository>,
}

impl Storage {
    pub fn postgres(pool: PgPool, timeout: Duration) -> Self {
        let store = Arc::new(postgres::PgStore::new(pool, timeout));
        Self {
            users: store.clone(),
            roles: store.clone(),
            posts: store.clone(),
            comments: store.clone(),
            followers: store,
        }
    }

    #[cfg(test)]
    pub fn in_memory(store: Arc<memory::MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            roles: store.clone(),
            posts: store.clone(),
            comments: store.clone(),
            followers: store,
        }
    }
}

/// Runs a store operation under `limit`. Dropping the future on expiry also
/// drops any open transaction, which rolls it back.
pub(crate) async fn timed<T, F>(limit: Duration, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(res) => res,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
