use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::store::UserId;

/// JWT payload. Issuer and audience carry the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    pub fn new(user_id: UserId, issuer: &str, ttl: Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            sub: user_id.to_string(),
            iat: now.unix_timestamp(),
            nbf: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            iss: issuer.to_string(),
            aud: issuer.to_string(),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.sub.parse().ok()
    }
}
