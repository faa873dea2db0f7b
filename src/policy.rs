//! Ownership and role-precedence authorization.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::store::{RoleRepository, StoreError, User, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Forbidden,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("role {0:?} does not exist")]
    RoleNotFound(String),
    #[error("role lookup failed: {0}")]
    Internal(#[source] StoreError),
}

#[derive(Clone)]
pub struct AuthorizationPolicy {
    roles: Arc<dyn RoleRepository>,
}

impl AuthorizationPolicy {
    pub fn new(roles: Arc<dyn RoleRepository>) -> Self {
        Self { roles }
    }

    /// Owners always pass. Everyone else needs a role at least as high as
    /// `required_role`.
    #[instrument(skip(self, identity), fields(user_id = identity.id, role = %identity.role.name))]
    pub async fn authorize(
        &self,
        identity: &User,
        owner_id: UserId,
        required_role: &str,
    ) -> Result<Decision, PolicyError> {
        if identity.id == owner_id {
            return Ok(Decision::Allowed);
        }
        let required = self.roles.get_by_name(required_role).await.map_err(|e| match e {
            StoreError::NotFound => PolicyError::RoleNotFound(required_role.to_string()),
            other => PolicyError::Internal(other),
        })?;
        if identity.role.level >= required.level {
            Ok(Decision::Allowed)
        } else {
            debug!(required = required.level, "insufficient role level");
            Ok(Decision::Forbidden)
        }
    }
}
