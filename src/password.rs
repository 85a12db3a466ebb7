//! Password hashing and verification with Argon2id.
//!
//! Hashes are stored as PHC strings (`$argon2id$v=19$m=19456,t=2,p=1$...`), so the
//! salt and parameters travel with the hash and verification needs nothing else.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use std::sync::OnceLock;
use thiserror::Error;

/// Longest accepted plaintext, in bytes. Hashing never fails below this.
pub const MAX_PASSWORD_BYTES: usize = 1024;

#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("Password must be at most {max} bytes")]
    TooLong { max: usize },

    #[error("{0}")]
    Hash(String),
}

/// Hash a password with a fresh random salt. Returns a PHC-format string.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(PasswordError::TooLong {
            max: MAX_PASSWORD_BYTES,
        });
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Check a plaintext against a stored PHC hash.
///
/// Any mismatch is `false`, including a stored hash that does not parse.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Runs [`hash_password`] off the async executor.
pub async fn hash_password_blocking(password: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| PasswordError::Hash(format!("hashing task failed: {e}")))?
}

/// Runs [`verify_password`] off the async executor. A panicked task counts as a mismatch.
pub async fn verify_password_blocking(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .unwrap_or(false)
}

static DECOY_HASH: OnceLock<String> = OnceLock::new();

/// Spends the same work as a real verification and always fails. Used when a login names
/// an unknown email, so response timing does not reveal which accounts exist.
pub async fn verify_password_decoy(password: String) -> bool {
    tokio::task::spawn_blocking(move || {
        let hash = DECOY_HASH.get_or_init(|| hash_password("decoy-password").unwrap_or_default());
        let _ = verify_password(&password, hash);
        false
    })
    .await
    .unwrap_or(false)
}
