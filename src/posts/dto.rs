use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    store::{Comment, Post},
};

const MAX_TITLE: usize = 100;
const MAX_CONTENT: usize = 1000;
const MAX_COMMENT: usize = 200;

fn check_len(field: &str, value: &str, max: usize) -> Result<(), ApiError> {
    if value.chars().count() > max {
        return Err(ApiError::BadRequest(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CreatePostRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.title.trim().is_empty() || self.content.trim().is_empty() {
            return Err(ApiError::BadRequest("title and content are required".into()));
        }
        check_len("title", &self.title, MAX_TITLE)?;
        check_len("content", &self.content, MAX_CONTENT)
    }
}

/// Partial update. `version` is the version the client last read; when
/// absent the server's current version is used.
#[derive(Debug, Default, Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub version: Option<i32>,
}

impl UpdatePostRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if let Some(title) = &self.title {
            check_len("title", title, MAX_TITLE)?;
        }
        if let Some(content) = &self.content {
            check_len("content", content, MAX_CONTENT)?;
        }
        Ok(())
    }

    pub fn apply(self, post: &mut Post) {
        if let Some(title) = self.title {
            post.title = title;
        }
        if let Some(content) = self.content {
            post.content = content;
        }
        if let Some(tags) = self.tags {
            post.tags = tags;
        }
        if let Some(version) = self.version {
            post.version = version;
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

impl CreateCommentRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.content.trim().is_empty() {
            return Err(ApiError::BadRequest("content is required".into()));
        }
        check_len("content", &self.content, MAX_COMMENT)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostWithComments {
    #[serde(flatten)]
    pub post: Post,
    pub comments: Vec<Comment>,
}
