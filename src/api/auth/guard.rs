//! Bearer token guard: HS256 JWTs with server-side revocation by `jti`.
//!
//! A token is `issued -> active -> {refreshed, revoked, expired}`. Revoked ids
//! are remembered until the token could no longer be refreshed, after which
//! its signature check alone rejects it.

use crate::store::AdminUser;
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};
use tracing::debug;
use ulid::Ulid;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// User name the token was issued for.
    pub name: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl Claims {
    #[must_use]
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub claims: Claims,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token is invalid")]
    Invalid,
    #[error("Token has expired")]
    Expired,
    #[error("Token has been revoked")]
    Revoked,
    #[error("Token can no longer be refreshed")]
    RefreshWindowClosed,
    #[error("Token subject does not match")]
    SubjectMismatch,
    #[error("Failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

pub struct TokenGuard {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
    refresh_ttl: Duration,
    // jti -> unix second after which the entry can be dropped
    revoked: Mutex<HashMap<String, i64>>,
}

impl std::fmt::Debug for TokenGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGuard")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenGuard {
    #[must_use]
    pub fn new(secret: &SecretString, issuer: String, ttl: Duration, refresh_ttl: Duration) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer,
            ttl,
            refresh_ttl,
            revoked: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a fresh token for `user`.
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if encoding fails.
    pub fn issue(&self, user: &AdminUser) -> Result<IssuedToken, TokenError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.to_string(),
            name: user.name.clone(),
            jti: Ulid::new().to_string(),
            iat: now,
            exp: now + self.ttl.num_seconds(),
            iss: self.issuer.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        Ok(IssuedToken {
            token,
            expires_at: claims.exp,
            claims,
        })
    }

    /// Validate signature, issuer, expiry and revocation.
    ///
    /// # Errors
    /// Returns the reason the token is not usable.
    pub fn authenticate(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.decode(token, true)?;
        if self.is_revoked(&claims.jti) {
            return Err(TokenError::Revoked);
        }
        Ok(claims)
    }

    /// Validate a token for the refresh exchange. Expired tokens are accepted
    /// while `iat + refresh_ttl` is still in the future.
    ///
    /// # Errors
    /// Returns the reason the token cannot be refreshed.
    pub fn refreshable(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.decode(token, false)?;
        if claims.iat + self.refresh_ttl.num_seconds() <= Utc::now().timestamp() {
            return Err(TokenError::RefreshWindowClosed);
        }
        if self.is_revoked(&claims.jti) {
            return Err(TokenError::Revoked);
        }
        Ok(claims)
    }

    /// Exchange `claims` for a new token bound to `user`, revoking the old one.
    ///
    /// The revocation is checked and recorded under one lock, so a token can
    /// only be exchanged once.
    ///
    /// # Errors
    /// Returns `TokenError::Revoked` if the token was already exchanged or revoked.
    pub fn refresh(&self, claims: &Claims, user: &AdminUser) -> Result<IssuedToken, TokenError> {
        if claims.user_id() != Some(user.id) {
            return Err(TokenError::SubjectMismatch);
        }
        {
            let mut revoked = self.revoked.lock().unwrap_or_else(PoisonError::into_inner);
            if revoked.contains_key(&claims.jti) {
                return Err(TokenError::Revoked);
            }
            prune(&mut revoked, Utc::now().timestamp());
            revoked.insert(claims.jti.clone(), self.forget_after(claims));
        }
        debug!("Refreshed token {} for user {}", claims.jti, user.id);
        self.issue(user)
    }

    /// Revoke a token. Revoking twice is a no-op.
    pub fn revoke(&self, claims: &Claims) {
        let mut revoked = self.revoked.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut revoked, Utc::now().timestamp());
        revoked.insert(claims.jti.clone(), self.forget_after(claims));
    }

    fn forget_after(&self, claims: &Claims) -> i64 {
        (claims.iat + self.refresh_ttl.num_seconds()).max(claims.exp)
    }

    fn is_revoked(&self, jti: &str) -> bool {
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(jti)
    }

    fn decode(&self, token: &str, validate_exp: bool) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.leeway = 0;
        validation.validate_exp = validate_exp;
        if !validate_exp {
            validation.required_spec_claims.remove("exp");
        }

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

/// Drop ids whose tokens can no longer be refreshed.
fn prune(revoked: &mut HashMap<String, i64>, now: i64) {
    revoked.retain(|_, forget_after| *forget_after > now);
}
