use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Typed failures surfaced by every repository. Backend errors never leak raw.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,
    #[error("email already exists")]
    DuplicateEmail,
    #[error("username already exists")]
    DuplicateUsername,
    #[error("resource already exists")]
    DuplicateKey,
    #[error("resource was modified by another request")]
    Conflict,
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("storage backend unavailable")]
    Unavailable,
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let translated = match &err {
            sqlx::Error::RowNotFound => Some(StoreError::NotFound),
            sqlx::Error::Database(db) => match (db.code().as_deref(), db.constraint()) {
                (Some(UNIQUE_VIOLATION), Some("users_email_key")) => {
                    Some(StoreError::DuplicateEmail)
                }
                (Some(UNIQUE_VIOLATION), Some("users_username_key")) => {
                    Some(StoreError::DuplicateUsername)
                }
                (Some(UNIQUE_VIOLATION), _) => Some(StoreError::DuplicateKey),
                (Some(FOREIGN_KEY_VIOLATION), _) => Some(StoreError::NotFound),
                _ => None,
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Some(StoreError::Unavailable),
            _ => None,
        };
        translated.unwrap_or(StoreError::Database(err))
    }
}

impl StoreError {
    /// True for failures that are the backend's fault rather than the caller's.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout(_) | StoreError::Unavailable | StoreError::Database(_)
        )
    }
}
