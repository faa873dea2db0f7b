//! Cache-aside identity resolution over a volatile key/value cache.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::store::{StoreError, User, UserId, UserRepository};

#[cfg(test)]
pub mod memory;
pub mod redis;

#[cfg(test)]
pub use memory::MemoryUserCache;
pub use redis::RedisUserCache;

/// Lifetime of a cached identity entry.
pub const USER_TTL: Duration = Duration::from_secs(30);

pub fn user_key(id: UserId) -> String {
    format!("user-{id}")
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache operation timed out")]
    Timeout,
    #[error("cached entry is not valid: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait UserCache: Send + Sync {
    async fn get(&self, id: UserId) -> Result<Option<User>, CacheError>;
    /// Overwrites any existing entry; expires after [`USER_TTL`].
    async fn set(&self, user: &User) -> Result<(), CacheError>;
}

/// Resolves identities from the cache first, the durable store second.
///
/// The cache is never a source of truth: any cache failure degrades to a
/// miss, and fill failures are logged and dropped.
#[derive(Clone)]
pub struct IdentityCache {
    cache: Option<Arc<dyn UserCache>>,
    users: Arc<dyn UserRepository>,
    op_timeout: Duration,
}

impl IdentityCache {
    pub fn new(
        cache: Option<Arc<dyn UserCache>>,
        users: Arc<dyn UserRepository>,
        op_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            users,
            op_timeout,
        }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, id: UserId) -> Result<User, StoreError> {
        let Some(cache) = &self.cache else {
            return self.resolve_uncached(id).await;
        };

        match tokio::time::timeout(self.op_timeout, cache.get(id)).await {
            Ok(Ok(Some(user))) => {
                debug!("identity cache hit");
                return Ok(user);
            }
            Ok(Ok(None)) => debug!("identity cache miss"),
            Ok(Err(e)) => warn!(error = %e, "identity cache read failed"),
            Err(_) => warn!("identity cache read timed out"),
        }

        let user = self.users.get_by_id(id).await?;

        match tokio::time::timeout(self.op_timeout, cache.set(&user)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "identity cache fill failed"),
            Err(_) => warn!("identity cache fill timed out"),
        }
        Ok(user)
    }

    /// Reads straight from the durable store.
    pub async fn resolve_uncached(&self, id: UserId) -> Result<User, StoreError> {
        self.users.get_by_id(id).await
    }
}
