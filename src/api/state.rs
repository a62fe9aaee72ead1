use super::{
    auth::{AuthConfig, TokenGuard},
    captcha::CaptchaStore,
    rate_limit::{FixedWindowLimiter, RateLimiter},
};
use crate::store::Store;
use std::{sync::Arc, time::Duration};

/// Shared state handed to every handler and middleware.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: AuthConfig,
    pub guard: TokenGuard,
    pub limiter: Arc<dyn RateLimiter>,
    pub captchas: CaptchaStore,
}

impl AppState {
    #[must_use]
    pub fn new(config: AuthConfig, store: Arc<dyn Store>) -> Self {
        let limiter = Arc::new(FixedWindowLimiter::new(
            config.throttle_max_attempts(),
            Duration::from_secs(config.throttle_decay_minutes().saturating_mul(60)),
        ));
        Self::with_limiter(config, store, limiter)
    }

    #[must_use]
    pub fn with_limiter(
        config: AuthConfig,
        store: Arc<dyn Store>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let guard = TokenGuard::new(
            config.jwt_secret(),
            config.issuer().to_string(),
            chrono::Duration::hours(config.token_ttl_hours()),
            chrono::Duration::hours(config.refresh_ttl_hours()),
        );
        Self {
            store,
            config,
            guard,
            limiter,
            captchas: CaptchaStore::default(),
        }
    }
}
