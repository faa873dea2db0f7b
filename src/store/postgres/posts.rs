use async_trait::async_trait;
use tracing::{debug, instrument};

use super::PgStore;
use crate::store::{
    timed, FeedQuery, NewPost, Post, PostId, PostRepository, PostWithMetadata, Result,
    SortOrder, StoreError, UserId,
};

/// Escapes `LIKE` metacharacters so `search` matches literally under
/// `ESCAPE '\'`.
fn escape_like(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len());
    for ch in search.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Feed query for one sort direction. Direction comes from a closed enum,
/// never from raw input; `p.id` breaks ties so offset pages stay stable.
fn feed_sql(sort: SortOrder) -> String {
    let dir = sort.as_sql();
    format!(
        r#"
        SELECT p.id, p.user_id, p.title, p.content, p.tags, p.version,
               p.created_at, p.updated_at,
               u.username, COUNT(c.id) AS comments_count
          FROM posts p
          JOIN users u ON u.id = p.user_id
          LEFT JOIN comments c ON c.post_id = p.id
         WHERE (p.user_id = $1
                OR p.user_id IN (SELECT user_id FROM followers WHERE follower_id = $1))
           AND ($4::text = '' OR p.title ILIKE '%' || $4 || '%' ESCAPE '\'
                              OR p.content ILIKE '%' || $4 || '%' ESCAPE '\')
           AND (cardinality($5::text[]) = 0 OR p.tags @> $5::text[])
           AND ($6::timestamptz IS NULL OR p.created_at >= $6)
           AND ($7::timestamptz IS NULL OR p.created_at <= $7)
         GROUP BY p.id, u.username
         ORDER BY p.created_at {dir}, p.id {dir}
         LIMIT $2 OFFSET $3
        "#
    )
}

#[async_trait]
impl PostRepository for PgStore {
    #[instrument(skip(self, post), fields(user_id = post.user_id))]
    async fn create(&self, post: NewPost) -> Result<Post> {
        timed(self.timeout, async {
            let created = sqlx::query_as::<_, Post>(
                r#"
                INSERT INTO posts (user_id, title, content, tags, version)
                VALUES ($1, $2, $3, $4, 0)
                RETURNING id, user_id, title, content, tags, version, created_at, updated_at
                "#,
            )
            .bind(post.user_id)
            .bind(&post.title)
            .bind(&post.content)
            .bind(&post.tags)
            .fetch_one(&self.pool)
            .await?;
            Ok(created)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: PostId) -> Result<Post> {
        timed(self.timeout, async {
            sqlx::query_as::<_, Post>(
                r#"
                SELECT id, user_id, title, content, tags, version, created_at, updated_at
                  FROM posts
                 WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    #[instrument(skip(self, post), fields(post_id = post.id, version = post.version))]
    async fn update(&self, post: &Post) -> Result<Post> {
        timed(self.timeout, async {
            let mut tx = self.pool.begin().await?;

            let updated = sqlx::query_as::<_, Post>(
                r#"
                UPDATE posts
                   SET title = $2,
                       content = $3,
                       tags = $4,
                       version = version + 1,
                       updated_at = now()
                 WHERE id = $1 AND version = $5
                RETURNING id, user_id, title, content, tags, version, created_at, updated_at
                "#,
            )
            .bind(post.id)
            .bind(&post.title)
            .bind(&post.content)
            .bind(&post.tags)
            .bind(post.version)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(fresh) = updated {
                tx.commit().await?;
                return Ok(fresh);
            }

            // Zero rows: tell a stale version apart from a vanished post.
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM posts WHERE id = $1)")
                    .bind(post.id)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;

            if exists {
                debug!("stale post version");
                Err(StoreError::Conflict)
            } else {
                Err(StoreError::NotFound)
            }
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: PostId) -> Result<()> {
        timed(self.timeout, async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM comments WHERE post_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let res = sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(StoreError::NotFound);
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, query))]
    async fn feed(&self, user_id: UserId, query: &FeedQuery) -> Result<Vec<PostWithMetadata>> {
        let sql = feed_sql(query.sort);
        let search = escape_like(&query.search);

        timed(self.timeout, async {
            let rows = sqlx::query_as::<_, PostWithMetadata>(&sql)
                .bind(user_id)
                .bind(query.limit)
                .bind(query.offset)
                .bind(&search)
                .bind(&query.tags)
                .bind(query.since)
                .bind(query.until)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        })
        .await
    }
}
