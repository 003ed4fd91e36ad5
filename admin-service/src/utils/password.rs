//! Password hashing and reset-token generation.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, anyhow::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(password_hash)
}

/// Verify a password against a stored hash. Returns false for a wrong
/// password or an unparseable hash - the caller only learns match / no
/// match.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(password_hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a password-reset token: the plain token goes to the subject,
/// only its digest is stored.
pub fn generate_reset_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);
    let digest = digest_reset_token(&token);
    (token, digest)
}

/// SHA-256 digest of a reset token, hex-encoded.
pub fn digest_reset_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("mySecurePassword123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("mySecurePassword123", &hash));
        assert!(!verify_password("wrongPassword", &hash));
    }

    #[test]
    fn same_password_hashes_differently() {
        let hash1 = hash_password("mySecurePassword123").unwrap();
        let hash2 = hash_password("mySecurePassword123").unwrap();
        assert_ne!(hash1, hash2);
        assert!(verify_password("mySecurePassword123", &hash1));
        assert!(verify_password("mySecurePassword123", &hash2));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn reset_token_digest_is_deterministic_and_distinct() {
        let (token, digest) = generate_reset_token();
        assert_eq!(token.len(), 64);
        assert_eq!(digest, digest_reset_token(&token));
        assert_ne!(token, digest);

        let (other_token, other_digest) = generate_reset_token();
        assert_ne!(token, other_token);
        assert_ne!(digest, other_digest);
    }
}
