use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    auth::TokenAuthenticator,
    cache::{IdentityCache, RedisUserCache, UserCache},
    config::AppConfig,
    mail::{LogMailer, Mailer},
    policy::AuthorizationPolicy,
    ratelimit::{self, Limiter},
    store::{postgres, Storage},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Storage,
    pub identity: IdentityCache,
    pub policy: AuthorizationPolicy,
    pub tokens: TokenAuthenticator,
    pub limiter: Arc<dyn Limiter>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Connects to Postgres and wires the Redis cache when enabled. The
    /// returned pool is for migrations.
    pub async fn init() -> anyhow::Result<(Self, sqlx::PgPool)> {
        let config = AppConfig::from_env()?;
        let pool = postgres::connect(&config.db.url, config.db.max_connections).await?;
        info!(max_connections = config.db.max_connections, "database pool ready");

        let storage = Storage::postgres(pool.clone(), config.db.query_timeout);
        let cache: Option<Arc<dyn UserCache>> = if config.redis.enabled {
            match RedisUserCache::connect_lazy(&config.redis.url, config.redis.op_timeout) {
                Ok(c) => Some(Arc::new(c)),
                Err(e) => {
                    warn!(error = %e, "redis cache disabled");
                    None
                }
            }
        } else {
            None
        };
        let mailer = Arc::new(LogMailer::new(config.mail_from.clone()));
        Ok((Self::from_parts(config, storage, cache, mailer), pool))
    }

    pub fn from_parts(
        config: AppConfig,
        storage: Storage,
        cache: Option<Arc<dyn UserCache>>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let identity = IdentityCache::new(cache, storage.users.clone(), config.redis.op_timeout);
        Self {
            policy: AuthorizationPolicy::new(storage.roles.clone()),
            tokens: TokenAuthenticator::new(&config.jwt),
            limiter: ratelimit::from_config(&config.rate_limit),
            identity,
            storage,
            mailer,
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
impl AppState {
    /// Fully in-memory state: no Postgres, no Redis.
    pub fn fake() -> Self {
        Self::fake_with_store(Arc::default())
    }

    pub fn fake_with_store(store: Arc<crate::store::memory::MemoryStore>) -> Self {
        use crate::cache::{MemoryUserCache, USER_TTL};

        let config = AppConfig::for_tests();
        let cache = Arc::new(MemoryUserCache::new(USER_TTL)) as Arc<dyn UserCache>;
        let mailer = Arc::new(LogMailer::new(config.mail_from.clone()));
        Self::from_parts(config, Storage::in_memory(store), Some(cache), mailer)
    }
}
