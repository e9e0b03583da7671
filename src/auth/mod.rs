use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

pub mod tokens;

/// Checks the coordinator bearer token presented on admin routes.
///
/// Only the SHA-256 digest of the configured token is kept in memory, and
/// comparison happens on digests so the raw token length does not leak.
/// An empty configured token disables the admin API entirely.
pub struct CoordinatorAuth {
    token_digest: Option<[u8; 32]>,
}

impl CoordinatorAuth {
    pub fn new(token: &str) -> Self {
        let token_digest = if token.is_empty() {
            None
        } else {
            Some(Sha256::digest(token.as_bytes()).into())
        };
        Self { token_digest }
    }

    pub fn verify(&self, presented: &str) -> bool {
        let Some(expected) = self.token_digest else {
            return false;
        };
        let presented: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        presented[..].ct_eq(&expected[..]).into()
    }
}

/// The person acting on a request, as forwarded by the upstream gateway.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_token() {
        let auth = CoordinatorAuth::new("s3cret");
        assert!(auth.verify("s3cret"));
        assert!(!auth.verify("s3cret "));
        assert!(!auth.verify(""));
    }

    #[test]
    fn test_empty_token_rejects_everything() {
        let auth = CoordinatorAuth::new("");
        assert!(!auth.verify(""));
        assert!(!auth.verify("anything"));
    }
}
