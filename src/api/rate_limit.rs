//! Fixed-window rate limiting for the public endpoints.
//!
//! Each client IP gets `max_attempts` hits per window; the window starts on the
//! first hit and resets once it has elapsed.

use super::{error::ApiError, state::AppState, utils::client_ip};
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> RateLimitDecision;
    fn limit(&self) -> u32;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _key: &str) -> RateLimitDecision {
        RateLimitDecision::Allowed {
            remaining: u32::MAX,
        }
    }

    fn limit(&self) -> u32 {
        u32::MAX
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    hits: u32,
}

#[derive(Debug)]
pub struct FixedWindowLimiter {
    max_attempts: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.retain(|_, window| now.duration_since(window.started) < self.window);

        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            hits: 0,
        });

        if window.hits >= self.max_attempts {
            let retry_after = self
                .window
                .saturating_sub(now.duration_since(window.started));
            return RateLimitDecision::Limited { retry_after };
        }

        window.hits += 1;
        RateLimitDecision::Allowed {
            remaining: self.max_attempts - window.hits,
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    fn limit(&self) -> u32 {
        self.max_attempts
    }
}

/// Middleware for throttled routes, keyed by client IP.
///
/// # Errors
/// Returns `ApiError::TooManyRequests` once the window is exhausted.
pub async fn throttle(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = client_ip(&request).unwrap_or_else(|| "unknown".to_string());
    let limit = state.limiter.limit();

    match state.limiter.check(&key) {
        RateLimitDecision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
            Ok(response)
        }
        RateLimitDecision::Limited { retry_after } => {
            debug!("Rate limited client {key}");
            Err(ApiError::TooManyRequests {
                limit,
                retry_after_secs: retry_after.as_secs().max(1),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert!(matches!(
            limiter.check("127.0.0.1"),
            RateLimitDecision::Allowed { .. }
        ));
    }

    #[test]
    fn fixed_window_limits_after_max_attempts() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(
            limiter.check_at("a", now),
            RateLimitDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check_at("a", now),
            RateLimitDecision::Allowed { remaining: 0 }
        );
        assert!(matches!(
            limiter.check_at("a", now + Duration::from_secs(10)),
            RateLimitDecision::Limited { retry_after } if retry_after == Duration::from_secs(50)
        ));
        // other clients keep their own window
        assert_eq!(
            limiter.check_at("b", now),
            RateLimitDecision::Allowed { remaining: 1 }
        );
    }

    #[test]
    fn fixed_window_resets_after_window() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(matches!(
            limiter.check_at("a", now),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at("a", now),
            RateLimitDecision::Limited { .. }
        ));
        assert_eq!(
            limiter.check_at("a", now + Duration::from_secs(61)),
            RateLimitDecision::Allowed { remaining: 0 }
        );
    }
}
