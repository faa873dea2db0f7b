use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{user_key, CacheError, UserCache};
use crate::store::{User, UserId};

/// Process-local TTL cache. Entries hold the same JSON a Redis entry would.
#[derive(Debug)]
pub struct MemoryUserCache {
    ttl: Duration,
    entries: DashMap<String, (Instant, String)>,
    failing: AtomicBool,
}

impl MemoryUserCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            failing: AtomicBool::new(false),
        }
    }

    /// Makes every call fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserCache for MemoryUserCache {
    async fn get(&self, id: UserId) -> Result<Option<User>, CacheError> {
        self.check()?;
        let key = user_key(id);
        let Some((expires, raw)) = self.entries.get(&key).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        if expires <= Instant::now() {
            self.entries.remove(&key);
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn set(&self, user: &User) -> Result<(), CacheError> {
        self.check()?;
        let raw = serde_json::to_string(user)?;
        self.entries
            .insert(user_key(user.id), (Instant::now() + self.ttl, raw));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::store::Role;

    fn user(id: UserId) -> User {
        User {
            id,
            username: format!("u{id}"),
            email: format!("u{id}@x.io"),
            password_hash: "secret-hash".into(),
            is_active: true,
            role: Role {
                id: 1,
                name: "user".into(),
                description: String::new(),
                level: 1,
            },
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = MemoryUserCache::new(Duration::from_millis(30));
        cache.set(&user(1)).await.expect("set");
        assert!(cache.get(1).await.expect("get").is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get(1).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn cached_copy_drops_password_hash() {
        let cache = MemoryUserCache::new(Duration::from_secs(30));
        cache.set(&user(2)).await.expect("set");
        let cached = cache.get(2).await.expect("get").expect("hit");
        assert_eq!(cached.username, "u2");
        assert!(cached.password_hash.is_empty());
    }
}
