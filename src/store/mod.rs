//! Persistence for admin users, roles and menus.
//!
//! Handlers only see the [`Store`] trait. [`MemoryStore`] backs tests and
//! development runs without a database; [`PgStore`] is used when a DSN is
//! configured.
//!
//! Invariants shared by both implementations:
//! - user `name`, `email` and `username` are unique, role `code` is unique;
//! - deleting a role detaches it from every user;
//! - deleting a menu detaches it from every role, and a menu with children
//!   cannot be deleted.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

pub const STATUS_DISABLED: i16 = 0;
pub const STATUS_ENABLED: i16 = 1;

/// Menu types as understood by the admin frontend.
pub const MENU_TYPE_MENU: i16 = 0;
pub const MENU_TYPE_IFRAME: i16 = 1;
pub const MENU_TYPE_LINK: i16 = 2;
pub const MENU_TYPE_BUTTON: i16 = 3;

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct AdminUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub username: String,
    pub nickname: String,
    pub avatar: String,
    pub status: i16,
    pub role_ids: Vec<i64>,
    #[serde(skip_serializing)]
    #[schema(ignore)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AdminUser {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.status == STATUS_ENABLED
    }
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub username: String,
    pub nickname: String,
    pub password_hash: String,
    pub status: i16,
    pub role_ids: Vec<i64>,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Clone, Debug, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub role_ids: Option<Vec<i64>>,
}

#[derive(Clone, Debug, Default)]
pub struct UserFilter {
    /// Substring matched against `username` and `name`.
    pub username: Option<String>,
    pub status: Option<i16>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub remark: String,
    pub status: i16,
    pub menu_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewRole {
    pub name: String,
    pub code: String,
    pub remark: String,
    pub status: i16,
    pub menu_ids: Vec<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct RolePatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub remark: Option<String>,
    pub menu_ids: Option<Vec<i64>>,
}

#[derive(Clone, Debug, Default)]
pub struct RoleFilter {
    pub name: Option<String>,
    pub code: Option<String>,
    pub status: Option<i16>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Menu {
    pub id: i64,
    pub parent_id: i64,
    pub menu_type: i16,
    pub title: String,
    pub name: String,
    pub path: String,
    pub component: String,
    pub icon: String,
    pub rank: i32,
    pub auths: String,
    pub show_link: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewMenu {
    pub parent_id: i64,
    pub menu_type: i16,
    pub title: String,
    pub name: String,
    pub path: String,
    pub component: String,
    pub icon: String,
    pub rank: i32,
    pub auths: String,
    pub show_link: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MenuPatch {
    pub parent_id: Option<i64>,
    pub menu_type: Option<i16>,
    pub title: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub component: Option<String>,
    pub icon: Option<String>,
    pub rank: Option<i32>,
    pub auths: Option<String>,
    pub show_link: Option<bool>,
}

/// One-based pagination window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub current_page: u32,
    pub page_size: u32,
}

impl Page {
    #[must_use]
    pub fn new(current_page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            current_page: current_page.filter(|page| *page > 0).unwrap_or(1),
            page_size: page_size
                .filter(|size| *size > 0)
                .map_or(DEFAULT_PAGE_SIZE, |size| size.min(MAX_PAGE_SIZE)),
        }
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.current_page - 1) * u64::from(self.page_size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub list: Vec<T>,
    pub total: u64,
    pub page_size: u32,
    pub current_page: u32,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn create_user(&self, user: NewUser) -> Result<AdminUser, StoreError>;
    async fn find_user(&self, id: i64) -> Result<Option<AdminUser>, StoreError>;
    async fn find_user_by_name(&self, name: &str) -> Result<Option<AdminUser>, StoreError>;
    async fn list_users(
        &self,
        filter: &UserFilter,
        page: Page,
    ) -> Result<Paged<AdminUser>, StoreError>;
    async fn update_user(&self, id: i64, patch: UserPatch) -> Result<AdminUser, StoreError>;
    async fn set_user_status(&self, id: i64, status: i16) -> Result<AdminUser, StoreError>;
    async fn set_user_password(&self, id: i64, password_hash: String) -> Result<(), StoreError>;
    async fn delete_user(&self, id: i64) -> Result<(), StoreError>;

    async fn create_role(&self, role: NewRole) -> Result<Role, StoreError>;
    async fn find_role(&self, id: i64) -> Result<Option<Role>, StoreError>;
    async fn find_role_by_code(&self, code: &str) -> Result<Option<Role>, StoreError>;
    /// Every enabled role, ordered by id.
    async fn all_roles(&self) -> Result<Vec<Role>, StoreError>;
    async fn list_roles(&self, filter: &RoleFilter, page: Page) -> Result<Paged<Role>, StoreError>;
    async fn update_role(&self, id: i64, patch: RolePatch) -> Result<Role, StoreError>;
    async fn set_role_status(&self, id: i64, status: i16) -> Result<Role, StoreError>;
    async fn delete_role(&self, id: i64) -> Result<(), StoreError>;

    async fn create_menu(&self, menu: NewMenu) -> Result<Menu, StoreError>;
    async fn find_menu(&self, id: i64) -> Result<Option<Menu>, StoreError>;
    /// Every menu, ordered by `rank` then id.
    async fn list_menus(&self) -> Result<Vec<Menu>, StoreError>;
    async fn update_menu(&self, id: i64, patch: MenuPatch) -> Result<Menu, StoreError>;
    async fn delete_menu(&self, id: i64) -> Result<(), StoreError>;
}
