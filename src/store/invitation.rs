use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Freshly minted activation token. `plain` goes to the user once; only
/// `digest` is ever persisted or compared.
#[derive(Debug, Clone)]
pub struct InvitationToken {
    pub plain: String,
    pub digest: String,
}

impl InvitationToken {
    pub fn generate() -> Self {
        let plain = Uuid::new_v4().to_string();
        let digest = digest(&plain);
        Self { plain, digest }
    }
}

/// SHA-256 hex digest of a plaintext invitation token.
pub fn digest(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}
