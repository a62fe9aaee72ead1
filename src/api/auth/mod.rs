//! Authentication: token guard, password hashing and principal resolution.
//!
//! Flow Overview:
//! 1) `login` calls [`attempt`], which looks the user up by name, verifies the
//!    Argon2id hash and asks the [`TokenGuard`] for a token.
//! 2) Protected routes run [`principal::authenticate`], which validates the
//!    bearer token and stores the [`Principal`] in request extensions.
//! 3) `logout` revokes the token id; `refresh` exchanges a token that is still
//!    inside its refresh window for a new one and revokes the old id.

pub mod guard;
pub mod password;
pub mod principal;

pub use guard::{Claims, IssuedToken, TokenError, TokenGuard};
pub use principal::{require_auth, Principal};

use super::state::AppState;
use crate::store::AdminUser;
use anyhow::Result;
use secrecy::SecretString;
use tracing::{debug, instrument};

const DEFAULT_TOKEN_TTL_HOURS: i64 = 1;
const DEFAULT_REFRESH_TTL_HOURS: i64 = 336;
const DEFAULT_ISSUER: &str = "backoffice";
const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:8848";
const DEFAULT_THROTTLE_MAX_ATTEMPTS: u32 = 100;
const DEFAULT_THROTTLE_DECAY_MINUTES: u64 = 30;
const DEFAULT_APP_TITLE: &str = "Backoffice";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    token_ttl_hours: i64,
    refresh_ttl_hours: i64,
    issuer: String,
    frontend_base_url: String,
    throttle_max_attempts: u32,
    throttle_decay_minutes: u64,
    captcha_login: bool,
    app_title: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            refresh_ttl_hours: DEFAULT_REFRESH_TTL_HOURS,
            issuer: DEFAULT_ISSUER.to_string(),
            frontend_base_url: DEFAULT_FRONTEND_BASE_URL.to_string(),
            throttle_max_attempts: DEFAULT_THROTTLE_MAX_ATTEMPTS,
            throttle_decay_minutes: DEFAULT_THROTTLE_DECAY_MINUTES,
            captcha_login: false,
            app_title: DEFAULT_APP_TITLE.to_string(),
        }
    }

    #[must_use]
    pub fn with_token_ttl_hours(mut self, hours: i64) -> Self {
        self.token_ttl_hours = hours;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_hours(mut self, hours: i64) -> Self {
        self.refresh_ttl_hours = hours;
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_frontend_base_url(mut self, url: String) -> Self {
        self.frontend_base_url = url;
        self
    }

    #[must_use]
    pub fn with_throttle(mut self, max_attempts: u32, decay_minutes: u64) -> Self {
        self.throttle_max_attempts = max_attempts;
        self.throttle_decay_minutes = decay_minutes;
        self
    }

    #[must_use]
    pub fn with_captcha_login(mut self, enabled: bool) -> Self {
        self.captcha_login = enabled;
        self
    }

    #[must_use]
    pub fn with_app_title(mut self, title: String) -> Self {
        self.app_title = title;
        self
    }

    pub(crate) fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    #[must_use]
    pub fn token_ttl_hours(&self) -> i64 {
        self.token_ttl_hours
    }

    #[must_use]
    pub fn refresh_ttl_hours(&self) -> i64 {
        self.refresh_ttl_hours
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn throttle_max_attempts(&self) -> u32 {
        self.throttle_max_attempts
    }

    #[must_use]
    pub fn throttle_decay_minutes(&self) -> u64 {
        self.throttle_decay_minutes
    }

    #[must_use]
    pub fn captcha_login(&self) -> bool {
        self.captcha_login
    }

    #[must_use]
    pub fn app_title(&self) -> &str {
        &self.app_title
    }
}

/// Verify `name`/`password` and issue a token.
///
/// Returns `Ok(None)` for an unknown user, a wrong password or a disabled
/// account; callers must not tell these apart in their response.
///
/// # Errors
/// Returns an error if the store or the token signer fails.
#[instrument(skip(state, password))]
pub async fn attempt(
    state: &AppState,
    name: &str,
    password: &str,
) -> Result<Option<(AdminUser, IssuedToken)>> {
    let Some(user) = state.store.find_user_by_name(name).await? else {
        debug!("Login attempt for unknown user");
        return Ok(None);
    };

    if !password::verify_password(password.to_string(), user.password_hash.clone()).await {
        debug!("Login attempt with wrong password");
        return Ok(None);
    }

    if !user.is_enabled() {
        debug!("Login attempt for disabled user {}", user.id);
        return Ok(None);
    }

    let issued = state.guard.issue(&user)?;
    Ok(Some((user, issued)))
}
