use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::{
    bb8::{Pool, RunError},
    redis::{AsyncCommands, RedisError},
    RedisConnectionManager,
};
use tracing::instrument;

use super::{user_key, CacheError, UserCache, USER_TTL};
use crate::store::{User, UserId};

/// Redis-backed identity cache storing JSON under `user-<id>`.
#[derive(Clone)]
pub struct RedisUserCache {
    pool: Pool<RedisConnectionManager>,
}

impl RedisUserCache {
    /// Builds the pool without dialing, so an unreachable Redis at boot
    /// only turns into cache misses later.
    pub fn connect_lazy(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let manager = RedisConnectionManager::new(url)?;
        let pool = Pool::builder()
            .connection_timeout(timeout)
            .build_unchecked(manager);
        Ok(Self { pool })
    }
}

impl From<RedisError> for CacheError {
    fn from(e: RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

impl From<RunError<RedisError>> for CacheError {
    fn from(e: RunError<RedisError>) -> Self {
        match e {
            RunError::User(e) => e.into(),
            RunError::TimedOut => CacheError::Timeout,
        }
    }
}

#[async_trait]
impl UserCache for RedisUserCache {
    #[instrument(skip(self))]
    async fn get(&self, id: UserId) -> Result<Option<User>, CacheError> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(user_key(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, user), fields(user_id = user.id))]
    async fn set(&self, user: &User) -> Result<(), CacheError> {
        let raw = serde_json::to_string(user)?;
        let mut conn = self.pool.get().await?;
        conn.set_ex::<_, _, ()>(user_key(user.id), raw, USER_TTL.as_secs())
            .await?;
        Ok(())
    }
}
