use async_trait::async_trait;
use tracing::instrument;

use super::PgStore;
use crate::store::{timed, FollowerRepository, Result, StoreError, UserId};

#[async_trait]
impl FollowerRepository for PgStore {
    /// Duplicate edges surface as `DuplicateKey`, unknown users as `NotFound`.
    #[instrument(skip(self))]
    async fn follow(&self, follower_id: UserId, followed_id: UserId) -> Result<()> {
        timed(self.timeout, async {
            sqlx::query("INSERT INTO followers (user_id, follower_id) VALUES ($1, $2)")
                .bind(followed_id)
                .bind(follower_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn unfollow(&self, follower_id: UserId, followed_id: UserId) -> Result<()> {
        timed(self.timeout, async {
            let res = sqlx::query("DELETE FROM followers WHERE user_id = $1 AND follower_id = $2")
                .bind(followed_id)
                .bind(follower_id)
                .execute(&self.pool)
                .await?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }
}
