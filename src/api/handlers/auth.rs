//! `/auth/*` endpoints: register, login, me, logout and refresh.

use super::{json_body, roles_and_permissions, MessageResponse, Validator};
use crate::{
    api::{
        auth::{attempt, password, IssuedToken, Principal},
        error::{ok, ApiError, ApiResponse},
        state::AppState,
        utils::extract_bearer_token,
    },
    store::{AdminUser, NewUser, STATUS_ENABLED},
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::Json,
    Extension,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

pub const REGISTERED_MESSAGE: &str = "User created successfully!";
pub const LOGGED_OUT_MESSAGE: &str = "登出成功";
pub const INVALID_CAPTCHA_MESSAGE: &str = "驗證碼錯誤";

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Authorization {
    pub token: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub message: String,
    pub user: AdminUser,
    pub authorization: Authorization,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    password: String,
    /// Captcha id from `/captchaImage`, only checked when captcha login is on.
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Token payload shared by login and refresh.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub token: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires: i64,
    /// Same instant as `expires`.
    #[serde(rename = "expires_in")]
    pub expires_in: i64,
    pub avatar: String,
    pub username: String,
    pub nickname: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

pub(crate) async fn token_payload(
    state: &AppState,
    user: &AdminUser,
    issued: IssuedToken,
) -> Result<TokenPayload, ApiError> {
    let (roles, permissions) = roles_and_permissions(state.store.as_ref(), user).await?;
    Ok(TokenPayload {
        access_token: issued.token.clone(),
        refresh_token: issued.token.clone(),
        token: issued.token,
        expires: issued.expires_at,
        expires_in: issued.expires_at,
        avatar: user.avatar.clone(),
        username: user.username.clone(),
        nickname: user.nickname.clone(),
        roles,
        permissions,
    })
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "User created and signed in", body = RegisterResponse),
        (status = 409, description = "Name, email or username already taken", body = crate::api::error::ErrorBody),
        (status = 422, description = "Invalid input", body = crate::api::error::ErrorBody),
        (status = 500, description = "Automatic sign-in failed", body = crate::api::error::ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let request = json_body(payload)?;
    let name = request.name.trim().to_string();
    let email = request.email.trim().to_lowercase();
    let username = request.username.trim().to_string();

    let mut validator = Validator::new();
    validator.required("name", &name);
    validator.required("email", &email);
    validator.email("email", &email);
    validator.required("username", &username);
    validator.required("password", &request.password);
    validator.min_len("password", &request.password, password::MIN_PASSWORD_LEN);
    validator.finish()?;

    let password_hash = password::hash_password(request.password.clone()).await?;
    let user = state
        .store
        .create_user(NewUser {
            name: name.clone(),
            email,
            nickname: username.clone(),
            username,
            password_hash,
            status: STATUS_ENABLED,
            role_ids: Vec::new(),
        })
        .await?;
    info!("Registered user {}", user.id);

    let Some((user, issued)) = attempt(&state, &name, &request.password).await? else {
        return Err(ApiError::Internal(format!(
            "registered user {} could not be signed in",
            user.id
        )));
    };

    Ok(Json(RegisterResponse {
        message: REGISTERED_MESSAGE.to_string(),
        user,
        authorization: Authorization {
            token: issued.token,
            token_type: "bearer".to_string(),
        },
    }))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = ApiResponse<TokenPayload>),
        (status = 401, description = "Wrong name or password", body = crate::api::error::ErrorBody),
        (status = 422, description = "Invalid input or captcha", body = crate::api::error::ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<TokenPayload>>, ApiError> {
    let request = json_body(payload)?;
    let name = request.name.trim();

    let mut validator = Validator::new();
    validator.required("name", name);
    validator.required("password", &request.password);
    validator.finish()?;

    if state.config.captcha_login() {
        let uuid = request.uuid.as_deref().unwrap_or_default();
        let code = request.code.as_deref().unwrap_or_default();
        if !state.captchas.verify(uuid, code) {
            return Err(ApiError::invalid_field("code", INVALID_CAPTCHA_MESSAGE));
        }
    }

    let Some((user, issued)) = attempt(&state, name, &request.password).await? else {
        return Err(ApiError::InvalidCredentials);
    };
    debug!("User {} signed in", user.id);

    Ok(ok(token_payload(&state, &user, issued).await?))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user", body = AdminUser),
        (status = 401, description = "Missing or invalid token", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip(principal), fields(user_id = principal.user.id))]
pub async fn me(Extension(principal): Extension<Principal>) -> Json<AdminUser> {
    Json(principal.user)
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Token revoked", body = MessageResponse),
        (status = 401, description = "Missing or invalid token", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip(state, principal), fields(user_id = principal.user.id))]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Json<MessageResponse> {
    state.guard.revoke(&principal.claims);
    debug!("Revoked token {}", principal.claims.jti);
    Json(MessageResponse {
        message: LOGGED_OUT_MESSAGE.to_string(),
    })
}

/// Exchange a token inside its refresh window for a new one.
///
/// This route sits outside the bearer middleware because it must accept
/// tokens that have already expired.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token issued, old token revoked", body = ApiResponse<TokenPayload>),
        (status = 401, description = "Token missing, revoked or past its refresh window", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip(state, headers))]
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<TokenPayload>>, ApiError> {
    let token = extract_bearer_token(&headers).ok_or_else(ApiError::unauthenticated)?;
    let claims = state.guard.refreshable(&token).map_err(|err| {
        debug!("Refresh rejected: {err}");
        ApiError::unauthenticated()
    })?;

    let user_id = claims.user_id().ok_or_else(ApiError::unauthenticated)?;
    let user = state
        .store
        .find_user(user_id)
        .await?
        .filter(AdminUser::is_enabled)
        .ok_or_else(ApiError::unauthenticated)?;

    let issued = state.guard.refresh(&claims, &user).map_err(|err| {
        debug!("Refresh rejected: {err}");
        ApiError::unauthenticated()
    })?;

    Ok(ok(token_payload(&state, &user, issued).await?))
}
