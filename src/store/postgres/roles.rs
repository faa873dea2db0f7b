use async_trait::async_trait;
use tracing::instrument;

use super::PgStore;
use crate::store::{timed, Result, Role, RoleRepository, StoreError};

#[async_trait]
impl RoleRepository for PgStore {
    #[instrument(skip(self))]
    async fn get_by_name(&self, name: &str) -> Result<Role> {
        timed(self.timeout, async {
            sqlx::query_as::<_, Role>(
                "SELECT id, name, description, level FROM roles WHERE name = $1",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
        })
        .await
    }
}
