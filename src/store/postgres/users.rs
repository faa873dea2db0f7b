use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use super::PgStore;
use crate::store::{
    invitation, repo_types::UserRow, timed, NewUser, Result, Role, StoreError, User,
    UserId, UserRepository, DEFAULT_ROLE,
};

#[async_trait]
impl UserRepository for PgStore {
    #[instrument(skip(self))]
    async fn get_by_id(&self, id: UserId) -> Result<User> {
        timed(self.timeout, async {
            let row = sqlx::query_as::<_, UserRow>(
                r#"
                SELECT u.id, u.username, u.email, u.password, u.is_active, u.created_at,
                       r.id AS role_id, r.name AS role_name,
                       r.description AS role_description, r.level AS role_level
                  FROM users u
                  JOIN roles r ON r.id = u.role_id
                 WHERE u.id = $1 AND u.is_active = true
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            row.map(User::from).ok_or(StoreError::NotFound)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_by_email(&self, email: &str) -> Result<User> {
        timed(self.timeout, async {
            let row = sqlx::query_as::<_, UserRow>(
                r#"
                SELECT u.id, u.username, u.email, u.password, u.is_active, u.created_at,
                       r.id AS role_id, r.name AS role_name,
                       r.description AS role_description, r.level AS role_level
                  FROM users u
                  JOIN roles r ON r.id = u.role_id
                 WHERE u.email = $1 AND u.is_active = true
                "#,
            )
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
            row.map(User::from).ok_or(StoreError::NotFound)
        })
        .await
    }

    #[instrument(skip(self, user, token_digest), fields(username = %user.username))]
    async fn create_and_invite(
        &self,
        user: NewUser,
        token_digest: &str,
        ttl: time::Duration,
    ) -> Result<User> {
        timed(self.timeout, async {
            let mut tx = self.pool.begin().await?;

            let role_name = if user.role.is_empty() {
                DEFAULT_ROLE
            } else {
                user.role.as_str()
            };
            let role = sqlx::query_as::<_, Role>(
                "SELECT id, name, description, level FROM roles WHERE name = $1",
            )
            .bind(role_name)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;

            let (id, created_at): (UserId, OffsetDateTime) = sqlx::query_as(
                r#"
                INSERT INTO users (username, email, password, role_id)
                VALUES ($1, $2, $3, $4)
                RETURNING id, created_at
                "#,
            )
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(role.id)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO user_invitations (token, user_id, expiry) VALUES ($1, $2, $3)",
            )
            .bind(token_digest)
            .bind(id)
            .bind(OffsetDateTime::now_utc() + ttl)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            debug!(user_id = id, "user created with pending invitation");

            Ok(User {
                id,
                username: user.username,
                email: user.email,
                password_hash: user.password_hash,
                is_active: false,
                role,
                created_at,
            })
        })
        .await
    }

    #[instrument(skip_all)]
    async fn activate(&self, plain_token: &str) -> Result<()> {
        let digest = invitation::digest(plain_token);
        timed(self.timeout, async {
            let mut tx = self.pool.begin().await?;

            // Row lock makes a concurrent second activation see the deletion.
            let user_id: UserId = sqlx::query_scalar(
                r#"
                SELECT ui.user_id
                  FROM user_invitations ui
                 WHERE ui.token = $1 AND ui.expiry > $2
                   FOR UPDATE
                "#,
            )
            .bind(&digest)
            .bind(OffsetDateTime::now_utc())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;

            sqlx::query("UPDATE users SET is_active = true WHERE id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM user_invitations WHERE user_id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            debug!(user_id, "user activated");
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: UserId) -> Result<()> {
        timed(self.timeout, async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM user_invitations WHERE user_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn purge_expired_invitations(&self) -> Result<u64> {
        timed(self.timeout, async {
            let res = sqlx::query(
                r#"
                DELETE FROM users u
                 WHERE u.is_active = false
                   AND EXISTS (
                       SELECT 1 FROM user_invitations ui
                        WHERE ui.user_id = u.id AND ui.expiry <= $1
                   )
                "#,
            )
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(res.rows_affected())
        })
        .await
    }
}
