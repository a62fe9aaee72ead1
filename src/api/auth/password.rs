//! Argon2id password hashing (PHC string format).
//!
//! Hashing is CPU bound, so the async wrappers run it on the blocking pool.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};

pub const MIN_PASSWORD_LEN: usize = 6;

fn hash_sync(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash password"))?
        .to_string())
}

fn verify_sync(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Hash `password` into a PHC string.
///
/// # Errors
/// Returns an error if hashing fails or the blocking task panics.
pub async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_sync(&password))
        .await
        .context("password hashing task failed")?
}

/// Check `password` against a stored PHC string. Malformed hashes never match.
pub async fn verify_password(password: String, stored_hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify_sync(&password, &stored_hash))
        .await
        .unwrap_or(false)
}
