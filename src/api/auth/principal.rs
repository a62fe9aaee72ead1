//! Authenticated principal extraction.
//!
//! Flow Overview: read the bearer token, validate it with the guard, load the
//! user and reject disabled accounts. Handlers behind the middleware read the
//! principal from request extensions.

use super::guard::Claims;
use crate::{
    api::{error::ApiError, state::AppState, utils::extract_bearer_token},
    store::AdminUser,
};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Authenticated user context derived from the bearer token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user: AdminUser,
    pub claims: Claims,
}

/// Resolve the `Authorization` header into a principal.
///
/// # Errors
/// Returns `ApiError::Unauthenticated` for missing, invalid, expired or revoked
/// tokens and for users that no longer exist or are disabled.
pub async fn require_auth(headers: &HeaderMap, state: &AppState) -> Result<Principal, ApiError> {
    let token = extract_bearer_token(headers).ok_or_else(ApiError::unauthenticated)?;

    let claims = state.guard.authenticate(&token).map_err(|err| {
        debug!("Rejected bearer token: {err}");
        ApiError::unauthenticated()
    })?;

    let user_id = claims.user_id().ok_or_else(ApiError::unauthenticated)?;
    let user = state
        .store
        .find_user(user_id)
        .await?
        .filter(AdminUser::is_enabled)
        .ok_or_else(ApiError::unauthenticated)?;

    Ok(Principal { user, claims })
}

/// Middleware for the protected route group.
///
/// # Errors
/// Returns `ApiError::Unauthenticated` when [`require_auth`] fails.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = require_auth(request.headers(), &state).await?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
