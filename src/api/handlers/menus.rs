//! `/admin/menu/*` endpoints.
//!
//! Menus form a forest through `parent_id` (0 is the root). Siblings are
//! ordered by `rank` then id, and a menu can never end up under itself.

use super::{json_body, query_params, IdQuery, IdRequest, Validator};
use crate::{
    api::{
        error::{ok, ApiError, ApiResponse},
        state::AppState,
    },
    store::{Menu, MenuPatch, NewMenu, MENU_TYPE_BUTTON, MENU_TYPE_MENU},
};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateMenuRequest {
    parent_id: i64,
    menu_type: Option<i16>,
    title: String,
    name: String,
    path: String,
    component: String,
    icon: String,
    rank: i32,
    auths: String,
    show_link: Option<bool>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateMenuRequest {
    id: i64,
    parent_id: Option<i64>,
    menu_type: Option<i16>,
    title: Option<String>,
    name: Option<String>,
    path: Option<String>,
    component: Option<String>,
    icon: Option<String>,
    rank: Option<i32>,
    auths: Option<String>,
    show_link: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MenuNode {
    #[serde(flatten)]
    pub menu: Menu,
    #[schema(no_recursion)]
    pub children: Vec<MenuNode>,
}

/// Nest `menus` by `parent_id`. Input order is kept among siblings; menus
/// whose parent is missing are promoted to the top level.
#[must_use]
pub fn build_tree(menus: Vec<Menu>) -> Vec<MenuNode> {
    let ids: Vec<i64> = menus.iter().map(|menu| menu.id).collect();
    let mut children: HashMap<i64, Vec<Menu>> = HashMap::new();
    for menu in menus {
        let parent = if menu.parent_id != 0 && ids.contains(&menu.parent_id) {
            menu.parent_id
        } else {
            0
        };
        children.entry(parent).or_default().push(menu);
    }

    fn attach(parent: i64, children: &mut HashMap<i64, Vec<Menu>>) -> Vec<MenuNode> {
        children
            .remove(&parent)
            .unwrap_or_default()
            .into_iter()
            .map(|menu| {
                let nested = attach(menu.id, children);
                MenuNode {
                    menu,
                    children: nested,
                }
            })
            .collect()
    }

    attach(0, &mut children)
}

/// True if `candidate` is `id` itself or sits somewhere below it.
fn is_self_or_descendant(menus: &[Menu], id: i64, candidate: i64) -> bool {
    let parents: HashMap<i64, i64> = menus.iter().map(|menu| (menu.id, menu.parent_id)).collect();
    let mut current = candidate;
    // bounded walk in case stored data already contains a loop
    for _ in 0..=menus.len() {
        if current == id {
            return true;
        }
        match parents.get(&current) {
            Some(&parent) if parent != 0 => current = parent,
            _ => return false,
        }
    }
    false
}

fn valid_menu_type(menu_type: i16) -> bool {
    (MENU_TYPE_MENU..=MENU_TYPE_BUTTON).contains(&menu_type)
}

#[utoipa::path(
    get,
    path = "/admin/menu/list",
    responses(
        (status = 200, description = "Every menu, flat", body = ApiResponse<Vec<Menu>>),
    ),
    security(("bearer" = [])),
    tag = "menus"
)]
#[instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Menu>>>, ApiError> {
    Ok(ok(state.store.list_menus().await?))
}

#[utoipa::path(
    get,
    path = "/admin/menu/tree",
    responses(
        (status = 200, description = "Every menu, nested by parent", body = ApiResponse<Vec<MenuNode>>),
    ),
    security(("bearer" = [])),
    tag = "menus"
)]
#[instrument(skip(state))]
pub async fn tree(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<MenuNode>>>, ApiError> {
    Ok(ok(build_tree(state.store.list_menus().await?)))
}

#[utoipa::path(
    get,
    path = "/admin/menu/info",
    params(IdQuery),
    responses(
        (status = 200, description = "One menu", body = ApiResponse<Menu>),
        (status = 404, description = "Unknown menu", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "menus"
)]
#[instrument(skip(state, query))]
pub async fn info(
    State(state): State<Arc<AppState>>,
    query: Result<Query<IdQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Menu>>, ApiError> {
    let query = query_params(query)?;
    state
        .store
        .find_menu(query.id)
        .await?
        .map(ok)
        .ok_or_else(|| ApiError::NotFound("Menu not found".to_string()))
}

#[utoipa::path(
    post,
    path = "/admin/menu/create",
    request_body = CreateMenuRequest,
    responses(
        (status = 200, description = "Menu created", body = ApiResponse<Menu>),
        (status = 422, description = "Invalid input or unknown parent", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "menus"
)]
#[instrument(skip(state, payload))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateMenuRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Menu>>, ApiError> {
    let request = json_body(payload)?;
    let menu_type = request.menu_type.unwrap_or(MENU_TYPE_MENU);

    let mut validator = Validator::new();
    validator.required("title", &request.title);
    validator.check(
        valid_menu_type(menu_type),
        "menuType",
        "The selected menuType is invalid.",
    );
    validator.finish()?;

    if request.parent_id != 0 && state.store.find_menu(request.parent_id).await?.is_none() {
        return Err(ApiError::invalid_field(
            "parentId",
            "The parent menu does not exist.",
        ));
    }

    let menu = state
        .store
        .create_menu(NewMenu {
            parent_id: request.parent_id,
            menu_type,
            title: request.title.trim().to_string(),
            name: request.name,
            path: request.path,
            component: request.component,
            icon: request.icon,
            rank: request.rank,
            auths: request.auths,
            show_link: request.show_link.unwrap_or(menu_type != MENU_TYPE_BUTTON),
        })
        .await?;
    info!("Created menu {}", menu.id);
    Ok(ok(menu))
}

#[utoipa::path(
    post,
    path = "/admin/menu/update",
    request_body = UpdateMenuRequest,
    responses(
        (status = 200, description = "Menu updated", body = ApiResponse<Menu>),
        (status = 404, description = "Unknown menu", body = crate::api::error::ErrorBody),
        (status = 422, description = "Invalid input or parent loop", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "menus"
)]
#[instrument(skip(state, payload))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateMenuRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Menu>>, ApiError> {
    let request = json_body(payload)?;

    let mut validator = Validator::new();
    validator.check(request.id > 0, "id", "The id field is required.");
    if let Some(title) = &request.title {
        validator.required("title", title);
    }
    if let Some(menu_type) = request.menu_type {
        validator.check(
            valid_menu_type(menu_type),
            "menuType",
            "The selected menuType is invalid.",
        );
    }
    validator.finish()?;

    if let Some(parent_id) = request.parent_id.filter(|parent_id| *parent_id != 0) {
        let menus = state.store.list_menus().await?;
        if !menus.iter().any(|menu| menu.id == parent_id) {
            return Err(ApiError::invalid_field(
                "parentId",
                "The parent menu does not exist.",
            ));
        }
        if is_self_or_descendant(&menus, request.id, parent_id) {
            return Err(ApiError::invalid_field(
                "parentId",
                "A menu cannot be moved under itself.",
            ));
        }
    }

    let menu = state
        .store
        .update_menu(
            request.id,
            MenuPatch {
                parent_id: request.parent_id,
                menu_type: request.menu_type,
                title: request.title.map(|title| title.trim().to_string()),
                name: request.name,
                path: request.path,
                component: request.component,
                icon: request.icon,
                rank: request.rank,
                auths: request.auths,
                show_link: request.show_link,
            },
        )
        .await?;
    Ok(ok(menu))
}

#[utoipa::path(
    post,
    path = "/admin/menu/delete",
    request_body = IdRequest,
    responses(
        (status = 200, description = "Menu deleted and detached from roles", body = ApiResponse<bool>),
        (status = 404, description = "Unknown menu", body = crate::api::error::ErrorBody),
        (status = 409, description = "Menu still has children", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "menus"
)]
#[instrument(skip(state, payload))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<bool>>, ApiError> {
    let request = json_body(payload)?;
    state.store.delete_menu(request.id).await?;
    info!("Deleted menu {}", request.id);
    Ok(ok(true))
}
