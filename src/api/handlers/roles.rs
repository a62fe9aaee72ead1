//! `/admin/role/*` endpoints.

use super::{
    empty_as_none, json_body, query_params, trimmed, IdQuery, IdRequest, StatusRequest, Validator,
};
use crate::{
    api::{
        error::{ok, ApiError, ApiResponse},
        state::AppState,
    },
    store::{NewRole, Page, Paged, Role, RoleFilter, RolePatch, Store, STATUS_ENABLED},
};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default, rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct RoleListQuery {
    name: Option<String>,
    code: Option<String>,
    #[serde(deserialize_with = "empty_as_none")]
    status: Option<i16>,
    #[serde(deserialize_with = "empty_as_none")]
    current_page: Option<u32>,
    #[serde(deserialize_with = "empty_as_none")]
    page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateRoleRequest {
    name: String,
    code: String,
    remark: String,
    status: Option<i16>,
    menu_ids: Vec<i64>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateRoleRequest {
    id: i64,
    name: Option<String>,
    code: Option<String>,
    remark: Option<String>,
    menu_ids: Option<Vec<i64>>,
}

async fn ensure_menus_exist(store: &dyn Store, menu_ids: &[i64]) -> Result<(), ApiError> {
    for id in menu_ids {
        if store.find_menu(*id).await?.is_none() {
            return Err(ApiError::invalid_field(
                "menuIds",
                format!("Menu {id} does not exist."),
            ));
        }
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/admin/role/all",
    responses(
        (status = 200, description = "Every enabled role", body = ApiResponse<Vec<Role>>),
    ),
    security(("bearer" = [])),
    tag = "roles"
)]
#[instrument(skip(state))]
pub async fn all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Role>>>, ApiError> {
    Ok(ok(state.store.all_roles().await?))
}

#[utoipa::path(
    get,
    path = "/admin/role/list",
    params(RoleListQuery),
    responses(
        (status = 200, description = "One page of roles", body = ApiResponse<Paged<Role>>),
    ),
    security(("bearer" = [])),
    tag = "roles"
)]
#[instrument(skip(state, query))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RoleListQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Paged<Role>>>, ApiError> {
    let query = query_params(query)?;
    let filter = RoleFilter {
        name: trimmed(query.name),
        code: trimmed(query.code),
        status: query.status,
    };
    let page = Page::new(query.current_page, query.page_size);
    Ok(ok(state.store.list_roles(&filter, page).await?))
}

#[utoipa::path(
    get,
    path = "/admin/role/info",
    params(IdQuery),
    responses(
        (status = 200, description = "One role", body = ApiResponse<Role>),
        (status = 404, description = "Unknown role", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "roles"
)]
#[instrument(skip(state, query))]
pub async fn info(
    State(state): State<Arc<AppState>>,
    query: Result<Query<IdQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Role>>, ApiError> {
    let query = query_params(query)?;
    state
        .store
        .find_role(query.id)
        .await?
        .map(ok)
        .ok_or_else(|| ApiError::NotFound("Role not found".to_string()))
}

#[utoipa::path(
    post,
    path = "/admin/role/create",
    request_body = CreateRoleRequest,
    responses(
        (status = 200, description = "Role created", body = ApiResponse<Role>),
        (status = 409, description = "Code already taken", body = crate::api::error::ErrorBody),
        (status = 422, description = "Invalid input", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "roles"
)]
#[instrument(skip(state, payload))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Role>>, ApiError> {
    let request = json_body(payload)?;
    let status = request.status.unwrap_or(STATUS_ENABLED);

    let mut validator = Validator::new();
    validator.required("name", &request.name);
    validator.required("code", &request.code);
    validator.status("status", status);
    validator.finish()?;
    ensure_menus_exist(state.store.as_ref(), &request.menu_ids).await?;

    let role = state
        .store
        .create_role(NewRole {
            name: request.name.trim().to_string(),
            code: request.code.trim().to_string(),
            remark: request.remark,
            status,
            menu_ids: request.menu_ids,
        })
        .await?;
    info!("Created role {} ({})", role.id, role.code);
    Ok(ok(role))
}

#[utoipa::path(
    post,
    path = "/admin/role/update",
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = ApiResponse<Role>),
        (status = 404, description = "Unknown role", body = crate::api::error::ErrorBody),
        (status = 409, description = "Code already taken", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "roles"
)]
#[instrument(skip(state, payload))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Role>>, ApiError> {
    let request = json_body(payload)?;

    let mut validator = Validator::new();
    validator.check(request.id > 0, "id", "The id field is required.");
    if let Some(name) = &request.name {
        validator.required("name", name);
    }
    if let Some(code) = &request.code {
        validator.required("code", code);
    }
    validator.finish()?;
    if let Some(menu_ids) = &request.menu_ids {
        ensure_menus_exist(state.store.as_ref(), menu_ids).await?;
    }

    let role = state
        .store
        .update_role(
            request.id,
            RolePatch {
                name: request.name.map(|name| name.trim().to_string()),
                code: request.code.map(|code| code.trim().to_string()),
                remark: request.remark,
                menu_ids: request.menu_ids,
            },
        )
        .await?;
    Ok(ok(role))
}

#[utoipa::path(
    post,
    path = "/admin/role/updateStatus",
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Status changed", body = ApiResponse<Role>),
        (status = 404, description = "Unknown role", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "roles"
)]
#[instrument(skip(state, payload))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Role>>, ApiError> {
    let request = json_body(payload)?;
    let mut validator = Validator::new();
    validator.status("status", request.status);
    validator.finish()?;

    Ok(ok(state
        .store
        .set_role_status(request.id, request.status)
        .await?))
}

#[utoipa::path(
    post,
    path = "/admin/role/delete",
    request_body = IdRequest,
    responses(
        (status = 200, description = "Role deleted and detached from users", body = ApiResponse<bool>),
        (status = 404, description = "Unknown role", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "roles"
)]
#[instrument(skip(state, payload))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<bool>>, ApiError> {
    let request = json_body(payload)?;
    state.store.delete_role(request.id).await?;
    info!("Deleted role {}", request.id);
    Ok(ok(true))
}
