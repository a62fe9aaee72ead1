//! `/admin/user/*` endpoints.

use super::{
    empty_as_none, json_body, query_params, roles_and_permissions, trimmed, IdRequest,
    StatusRequest, Validator,
};
use crate::{
    api::{
        auth::{password, Principal},
        error::{ok, ApiError, ApiResponse},
        state::AppState,
    },
    store::{AdminUser, NewUser, Page, Paged, Store, UserFilter, UserPatch, STATUS_DISABLED, STATUS_ENABLED},
};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::Json,
    Extension,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default, rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UserListQuery {
    /// Substring of the username or name.
    username: Option<String>,
    #[serde(deserialize_with = "empty_as_none")]
    status: Option<i16>,
    #[serde(deserialize_with = "empty_as_none")]
    current_page: Option<u32>,
    #[serde(deserialize_with = "empty_as_none")]
    page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateUserRequest {
    name: String,
    email: String,
    username: String,
    nickname: String,
    password: String,
    status: Option<i16>,
    role_ids: Vec<i64>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateUserRequest {
    id: i64,
    name: Option<String>,
    email: Option<String>,
    username: Option<String>,
    nickname: Option<String>,
    avatar: Option<String>,
    role_ids: Option<Vec<i64>>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    id: i64,
    password: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    old_password: String,
    new_password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileInfo {
    #[serde(flatten)]
    pub user: AdminUser,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

async fn ensure_roles_exist(store: &dyn Store, role_ids: &[i64]) -> Result<(), ApiError> {
    for id in role_ids {
        if store.find_role(*id).await?.is_none() {
            return Err(ApiError::invalid_field(
                "roleIds",
                format!("Role {id} does not exist."),
            ));
        }
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/admin/user/list",
    params(UserListQuery),
    responses(
        (status = 200, description = "One page of users", body = ApiResponse<Paged<AdminUser>>),
        (status = 401, description = "Missing or invalid token", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
#[instrument(skip(state, query))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    query: Result<Query<UserListQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Paged<AdminUser>>>, ApiError> {
    let query = query_params(query)?;
    let filter = UserFilter {
        username: trimmed(query.username),
        status: query.status,
    };
    let page = Page::new(query.current_page, query.page_size);
    Ok(ok(state.store.list_users(&filter, page).await?))
}

#[utoipa::path(
    post,
    path = "/admin/user/create",
    request_body = CreateUserRequest,
    responses(
        (status = 200, description = "User created", body = ApiResponse<AdminUser>),
        (status = 409, description = "Name, email or username already taken", body = crate::api::error::ErrorBody),
        (status = 422, description = "Invalid input", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
#[instrument(skip(state, payload))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AdminUser>>, ApiError> {
    let request = json_body(payload)?;
    let status = request.status.unwrap_or(STATUS_ENABLED);
    let email = request.email.trim().to_lowercase();

    let mut validator = Validator::new();
    validator.required("name", &request.name);
    validator.required("email", &email);
    validator.email("email", &email);
    validator.required("username", &request.username);
    validator.required("password", &request.password);
    validator.min_len("password", &request.password, password::MIN_PASSWORD_LEN);
    validator.status("status", status);
    validator.finish()?;
    ensure_roles_exist(state.store.as_ref(), &request.role_ids).await?;

    let user = state
        .store
        .create_user(NewUser {
            name: request.name.trim().to_string(),
            email,
            username: request.username.trim().to_string(),
            nickname: request.nickname.trim().to_string(),
            password_hash: password::hash_password(request.password).await?,
            status,
            role_ids: request.role_ids,
        })
        .await?;
    info!("Created user {}", user.id);
    Ok(ok(user))
}

#[utoipa::path(
    post,
    path = "/admin/user/update",
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = ApiResponse<AdminUser>),
        (status = 404, description = "Unknown user", body = crate::api::error::ErrorBody),
        (status = 409, description = "Name, email or username already taken", body = crate::api::error::ErrorBody),
        (status = 422, description = "Invalid input", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
#[instrument(skip(state, payload))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AdminUser>>, ApiError> {
    let request = json_body(payload)?;
    let email = request.email.map(|email| email.trim().to_lowercase());

    let mut validator = Validator::new();
    validator.check(request.id > 0, "id", "The id field is required.");
    for (field, value) in [
        ("name", &request.name),
        ("email", &email),
        ("username", &request.username),
    ] {
        if let Some(value) = value {
            validator.required(field, value);
        }
    }
    if let Some(email) = &email {
        validator.email("email", email);
    }
    validator.finish()?;
    if let Some(role_ids) = &request.role_ids {
        ensure_roles_exist(state.store.as_ref(), role_ids).await?;
    }

    let user = state
        .store
        .update_user(
            request.id,
            UserPatch {
                name: request.name.map(|name| name.trim().to_string()),
                email,
                username: request.username.map(|username| username.trim().to_string()),
                nickname: request.nickname,
                avatar: request.avatar,
                role_ids: request.role_ids,
            },
        )
        .await?;
    Ok(ok(user))
}

#[utoipa::path(
    post,
    path = "/admin/user/updateStatus",
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Status changed", body = ApiResponse<AdminUser>),
        (status = 403, description = "Cannot disable yourself", body = crate::api::error::ErrorBody),
        (status = 404, description = "Unknown user", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
#[instrument(skip(state, principal, payload))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AdminUser>>, ApiError> {
    let request = json_body(payload)?;
    let mut validator = Validator::new();
    validator.status("status", request.status);
    validator.finish()?;

    if request.id == principal.user.id && request.status == STATUS_DISABLED {
        return Err(ApiError::Forbidden(
            "You cannot disable your own account.".to_string(),
        ));
    }
    Ok(ok(state
        .store
        .set_user_status(request.id, request.status)
        .await?))
}

#[utoipa::path(
    post,
    path = "/admin/user/resetPassword",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced", body = ApiResponse<bool>),
        (status = 404, description = "Unknown user", body = crate::api::error::ErrorBody),
        (status = 422, description = "Invalid input", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<bool>>, ApiError> {
    let request = json_body(payload)?;
    let mut validator = Validator::new();
    validator.required("password", &request.password);
    validator.min_len("password", &request.password, password::MIN_PASSWORD_LEN);
    validator.finish()?;

    let hash = password::hash_password(request.password).await?;
    state.store.set_user_password(request.id, hash).await?;
    info!("Reset password of user {}", request.id);
    Ok(ok(true))
}

#[utoipa::path(
    post,
    path = "/admin/user/delete",
    request_body = IdRequest,
    responses(
        (status = 200, description = "User deleted", body = ApiResponse<bool>),
        (status = 403, description = "Cannot delete yourself", body = crate::api::error::ErrorBody),
        (status = 404, description = "Unknown user", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
#[instrument(skip(state, principal, payload))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<bool>>, ApiError> {
    let request = json_body(payload)?;
    if request.id == principal.user.id {
        return Err(ApiError::Forbidden(
            "You cannot delete your own account.".to_string(),
        ));
    }
    state.store.delete_user(request.id).await?;
    info!("Deleted user {}", request.id);
    Ok(ok(true))
}

#[utoipa::path(
    get,
    path = "/admin/user/profile/info",
    responses(
        (status = 200, description = "Current user with roles and permissions", body = ApiResponse<ProfileInfo>),
        (status = 401, description = "Missing or invalid token", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
#[instrument(skip(state, principal), fields(user_id = principal.user.id))]
pub async fn profile(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ApiResponse<ProfileInfo>>, ApiError> {
    let (roles, permissions) = roles_and_permissions(state.store.as_ref(), &principal.user).await?;
    Ok(ok(ProfileInfo {
        user: principal.user,
        roles,
        permissions,
    }))
}

#[utoipa::path(
    post,
    path = "/admin/user/profile/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = ApiResponse<bool>),
        (status = 422, description = "Old password does not match or new password is invalid", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
#[instrument(skip(state, principal, payload), fields(user_id = principal.user.id))]
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<bool>>, ApiError> {
    let request = json_body(payload)?;
    let mut validator = Validator::new();
    validator.required("oldPassword", &request.old_password);
    validator.required("newPassword", &request.new_password);
    validator.min_len("newPassword", &request.new_password, password::MIN_PASSWORD_LEN);
    validator.finish()?;

    if !password::verify_password(request.old_password, principal.user.password_hash.clone()).await
    {
        return Err(ApiError::invalid_field(
            "oldPassword",
            "The old password is incorrect.",
        ));
    }

    let hash = password::hash_password(request.new_password).await?;
    state.store.set_user_password(principal.user.id, hash).await?;
    Ok(ok(true))
}
