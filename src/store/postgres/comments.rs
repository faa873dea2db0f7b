use async_trait::async_trait;
use tracing::instrument;

use super::PgStore;
use crate::store::{timed, Comment, CommentRepository, NewComment, PostId, Result};

#[async_trait]
impl CommentRepository for PgStore {
    #[instrument(skip(self, comment), fields(post_id = comment.post_id))]
    async fn create(&self, comment: NewComment) -> Result<Comment> {
        timed(self.timeout, async {
            let created = sqlx::query_as::<_, Comment>(
                r#"
                WITH inserted AS (
                    INSERT INTO comments (post_id, user_id, content)
                    VALUES ($1, $2, $3)
                    RETURNING id, post_id, user_id, content, created_at
                )
                SELECT i.id, i.post_id, i.user_id, u.username, i.content, i.created_at
                  FROM inserted i
                  JOIN users u ON u.id = i.user_id
                "#,
            )
            .bind(comment.post_id)
            .bind(comment.user_id)
            .bind(&comment.content)
            .fetch_one(&self.pool)
            .await?;
            Ok(created)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_by_post(&self, post_id: PostId) -> Result<Vec<Comment>> {
        timed(self.timeout, async {
            let rows = sqlx::query_as::<_, Comment>(
                r#"
                SELECT c.id, c.post_id, c.user_id, u.username, c.content, c.created_at
                  FROM comments c
                  JOIN users u ON u.id = c.user_id
                 WHERE c.post_id = $1
                 ORDER BY c.created_at DESC
                 LIMIT 10
                "#,
            )
            .bind(post_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await
    }
}
