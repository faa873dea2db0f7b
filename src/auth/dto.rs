use serde::{Deserialize, Serialize};

use crate::{error::ApiError, store::User};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.username.trim().is_empty() || self.username.chars().count() > 100 {
            return Err(ApiError::BadRequest(
                "username is required and must be at most 100 characters".into(),
            ));
        }
        if self.email.len() > 255 || !super::services::is_valid_email(&self.email) {
            return Err(ApiError::BadRequest("invalid email".into()));
        }
        if !(6..=72).contains(&self.password.len()) {
            return Err(ApiError::BadRequest(
                "password must be between 6 and 72 characters".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.email.len() > 255 || !super::services::is_valid_email(&self.email) {
            return Err(ApiError::BadRequest("invalid email".into()));
        }
        if !(3..=100).contains(&self.password.len()) {
            return Err(ApiError::BadRequest(
                "password must be between 3 and 100 characters".into(),
            ));
        }
        Ok(())
    }
}

/// Registration result. `token` is the plaintext activation token and is
/// never retrievable again.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserWithToken {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}
