//! Activation mail delivery.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends the activation link for a freshly registered user.
    async fn send_welcome(
        &self,
        username: &str,
        email: &str,
        activation_url: &str,
    ) -> Result<(), MailError>;
}

pub fn activation_url(frontend_url: &str, token: &str) -> String {
    format!("{}/confirm/{}", frontend_url.trim_end_matches('/'), token)
}

/// Writes the activation link to the log instead of sending it.
#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_welcome(
        &self,
        username: &str,
        email: &str,
        activation_url: &str,
    ) -> Result<(), MailError> {
        info!(from = %self.from, to = %email, %username, %activation_url, "activation mail");
        Ok(())
    }
}

/// Mailer that always fails. Exercises the registration compensation path.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct FailingMailer;

#[cfg(test)]
#[async_trait]
impl Mailer for FailingMailer {
    async fn send_welcome(&self, _: &str, _: &str, _: &str) -> Result<(), MailError> {
        Err(MailError::Delivery("smtp unavailable".into()))
    }
}
