//! PostgreSQL [`Store`] backed by `sqlx`.
//!
//! Role and menu assignments live in join tables (`admin_user_roles`,
//! `admin_role_menus`); ids are aggregated back into arrays on read.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Postgres, Row, Transaction,
};
use std::time::Duration;
use tracing::{info_span, Instrument, Span};

use super::{
    AdminUser, Menu, MenuPatch, NewMenu, NewRole, NewUser, Page, Paged, Role, RoleFilter,
    RolePatch, Store, StoreError, UserFilter, UserPatch,
};

pub const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

macro_rules! user_select {
    ($tail:literal) => {
        concat!(
            "SELECT u.id, u.name, u.email, u.username, u.nickname, u.avatar, u.status, u.password, ",
            "u.created_at, u.updated_at, ",
            "ARRAY(SELECT ur.role_id FROM admin_user_roles ur WHERE ur.user_id = u.id ORDER BY ur.role_id) AS role_ids ",
            "FROM admin_users u ",
            $tail
        )
    };
}

macro_rules! role_select {
    ($tail:literal) => {
        concat!(
            "SELECT r.id, r.name, r.code, r.remark, r.status, r.created_at, r.updated_at, ",
            "ARRAY(SELECT rm.menu_id FROM admin_role_menus rm WHERE rm.role_id = r.id ORDER BY rm.menu_id) AS menu_ids ",
            "FROM admin_roles r ",
            $tail
        )
    };
}

macro_rules! menu_select {
    ($tail:literal) => {
        concat!(
            "SELECT id, parent_id, menu_type, title, name, path, component, icon, menu_rank, auths, ",
            "show_link, created_at, updated_at FROM admin_menus ",
            $tail
        )
    };
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable or the schema cannot be applied.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;

        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .instrument(db_span("MIGRATE", "sql/schema.sql"))
            .await
            .context("Failed to apply database schema")?;

        Ok(Self::new(pool))
    }
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"))
}

fn map_write_error(err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        let constraint = match &err {
            sqlx::Error::Database(db) => db.constraint().unwrap_or("unique constraint").to_string(),
            _ => "unique constraint".to_string(),
        };
        StoreError::Conflict(format!("duplicate value violates {constraint}"))
    } else if is_foreign_key_violation(&err) {
        StoreError::Conflict("referenced record does not exist".to_string())
    } else {
        StoreError::Database(err)
    }
}

fn like_pattern(term: Option<&str>) -> Option<String> {
    term.map(|term| format!("%{}%", term.replace('%', "\\%").replace('_', "\\_")))
}

fn limit_offset(page: Page) -> (i64, i64) {
    (
        i64::from(page.page_size),
        i64::try_from(page.offset()).unwrap_or(i64::MAX),
    )
}

fn user_from_row(row: &PgRow) -> Result<AdminUser, sqlx::Error> {
    Ok(AdminUser {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        nickname: row.try_get("nickname")?,
        avatar: row.try_get("avatar")?,
        status: row.try_get("status")?,
        role_ids: row.try_get("role_ids")?,
        password_hash: row.try_get("password")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        remark: row.try_get("remark")?,
        status: row.try_get("status")?,
        menu_ids: row.try_get("menu_ids")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn menu_from_row(row: &PgRow) -> Result<Menu, sqlx::Error> {
    Ok(Menu {
        id: row.try_get("id")?,
        parent_id: row.try_get("parent_id")?,
        menu_type: row.try_get("menu_type")?,
        title: row.try_get("title")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        component: row.try_get("component")?,
        icon: row.try_get("icon")?,
        rank: row.try_get("menu_rank")?,
        auths: row.try_get("auths")?,
        show_link: row.try_get("show_link")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn replace_user_roles(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    role_ids: &[i64],
) -> Result<(), StoreError> {
    let query = "DELETE FROM admin_user_roles WHERE user_id = $1";
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(db_span("DELETE", query))
        .await?;

    let query = "INSERT INTO admin_user_roles (user_id, role_id) SELECT $1, UNNEST($2::bigint[]) ON CONFLICT DO NOTHING";
    sqlx::query(query)
        .bind(user_id)
        .bind(role_ids)
        .execute(&mut **tx)
        .instrument(db_span("INSERT", query))
        .await
        .map_err(map_write_error)?;
    Ok(())
}

async fn replace_role_menus(
    tx: &mut Transaction<'_, Postgres>,
    role_id: i64,
    menu_ids: &[i64],
) -> Result<(), StoreError> {
    let query = "DELETE FROM admin_role_menus WHERE role_id = $1";
    sqlx::query(query)
        .bind(role_id)
        .execute(&mut **tx)
        .instrument(db_span("DELETE", query))
        .await?;

    let query = "INSERT INTO admin_role_menus (role_id, menu_id) SELECT $1, UNNEST($2::bigint[]) ON CONFLICT DO NOTHING";
    sqlx::query(query)
        .bind(role_id)
        .bind(menu_ids)
        .execute(&mut **tx)
        .instrument(db_span("INSERT", query))
        .await
        .map_err(map_write_error)?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> Result<AdminUser, StoreError> {
        let mut tx = self.pool.begin().await?;
        let query = "INSERT INTO admin_users (name, email, username, nickname, status, password) VALUES ($1, $2, $3, $4, $5, $6) RETURNING id";
        let row = sqlx::query(query)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.username)
            .bind(&user.nickname)
            .bind(user.status)
            .bind(&user.password_hash)
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(map_write_error)?;
        let id: i64 = row.try_get("id")?;
        replace_user_roles(&mut tx, id, &user.role_ids).await?;
        tx.commit().await?;

        self.find_user(id).await?.ok_or(StoreError::NotFound)
    }

    async fn find_user(&self, id: i64) -> Result<Option<AdminUser>, StoreError> {
        let query = user_select!("WHERE u.id = $1");
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<AdminUser>, StoreError> {
        let query = user_select!("WHERE u.name = $1");
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn list_users(
        &self,
        filter: &UserFilter,
        page: Page,
    ) -> Result<Paged<AdminUser>, StoreError> {
        let pattern = like_pattern(filter.username.as_deref());
        let (limit, offset) = limit_offset(page);

        let query = "SELECT COUNT(*) AS total FROM admin_users u WHERE ($1::text IS NULL OR u.username ILIKE $1 OR u.name ILIKE $1) AND ($2::smallint IS NULL OR u.status = $2)";
        let total: i64 = sqlx::query(query)
            .bind(pattern.as_deref())
            .bind(filter.status)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?
            .try_get("total")?;

        let query = user_select!(
            "WHERE ($1::text IS NULL OR u.username ILIKE $1 OR u.name ILIKE $1) AND ($2::smallint IS NULL OR u.status = $2) ORDER BY u.id LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(query)
            .bind(pattern.as_deref())
            .bind(filter.status)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;

        Ok(Paged {
            list: rows.iter().map(user_from_row).collect::<Result<_, _>>()?,
            total: u64::try_from(total).unwrap_or_default(),
            page_size: page.page_size,
            current_page: page.current_page,
        })
    }

    async fn update_user(&self, id: i64, patch: UserPatch) -> Result<AdminUser, StoreError> {
        let mut tx = self.pool.begin().await?;
        let query = "UPDATE admin_users SET name = COALESCE($2, name), email = COALESCE($3, email), username = COALESCE($4, username), nickname = COALESCE($5, nickname), avatar = COALESCE($6, avatar), updated_at = now() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(patch.name)
            .bind(patch.email)
            .bind(patch.username)
            .bind(patch.nickname)
            .bind(patch.avatar)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(map_write_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        if let Some(role_ids) = patch.role_ids {
            replace_user_roles(&mut tx, id, &role_ids).await?;
        }
        tx.commit().await?;

        self.find_user(id).await?.ok_or(StoreError::NotFound)
    }

    async fn set_user_status(&self, id: i64, status: i16) -> Result<AdminUser, StoreError> {
        let query = "UPDATE admin_users SET status = $2, updated_at = now() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.find_user(id).await?.ok_or(StoreError::NotFound)
    }

    async fn set_user_password(&self, id: i64, password_hash: String) -> Result<(), StoreError> {
        let query = "UPDATE admin_users SET password = $2, updated_at = now() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<(), StoreError> {
        let query = "DELETE FROM admin_users WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_role(&self, role: NewRole) -> Result<Role, StoreError> {
        let mut tx = self.pool.begin().await?;
        let query = "INSERT INTO admin_roles (name, code, remark, status) VALUES ($1, $2, $3, $4) RETURNING id";
        let row = sqlx::query(query)
            .bind(&role.name)
            .bind(&role.code)
            .bind(&role.remark)
            .bind(role.status)
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(map_write_error)?;
        let id: i64 = row.try_get("id")?;
        replace_role_menus(&mut tx, id, &role.menu_ids).await?;
        tx.commit().await?;

        self.find_role(id).await?.ok_or(StoreError::NotFound)
    }

    async fn find_role(&self, id: i64) -> Result<Option<Role>, StoreError> {
        let query = role_select!("WHERE r.id = $1");
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(row.as_ref().map(role_from_row).transpose()?)
    }

    async fn find_role_by_code(&self, code: &str) -> Result<Option<Role>, StoreError> {
        let query = role_select!("WHERE r.code = $1");
        let row = sqlx::query(query)
            .bind(code)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(row.as_ref().map(role_from_row).transpose()?)
    }

    async fn all_roles(&self) -> Result<Vec<Role>, StoreError> {
        let query = role_select!("WHERE r.status = 1 ORDER BY r.id");
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(rows.iter().map(role_from_row).collect::<Result<_, _>>()?)
    }

    async fn list_roles(&self, filter: &RoleFilter, page: Page) -> Result<Paged<Role>, StoreError> {
        let name = like_pattern(filter.name.as_deref());
        let code = like_pattern(filter.code.as_deref());
        let (limit, offset) = limit_offset(page);

        let query = "SELECT COUNT(*) AS total FROM admin_roles r WHERE ($1::text IS NULL OR r.name ILIKE $1) AND ($2::text IS NULL OR r.code ILIKE $2) AND ($3::smallint IS NULL OR r.status = $3)";
        let total: i64 = sqlx::query(query)
            .bind(name.as_deref())
            .bind(code.as_deref())
            .bind(filter.status)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?
            .try_get("total")?;

        let query = role_select!(
            "WHERE ($1::text IS NULL OR r.name ILIKE $1) AND ($2::text IS NULL OR r.code ILIKE $2) AND ($3::smallint IS NULL OR r.status = $3) ORDER BY r.id LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query(query)
            .bind(name.as_deref())
            .bind(code.as_deref())
            .bind(filter.status)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;

        Ok(Paged {
            list: rows.iter().map(role_from_row).collect::<Result<_, _>>()?,
            total: u64::try_from(total).unwrap_or_default(),
            page_size: page.page_size,
            current_page: page.current_page,
        })
    }

    async fn update_role(&self, id: i64, patch: RolePatch) -> Result<Role, StoreError> {
        let mut tx = self.pool.begin().await?;
        let query = "UPDATE admin_roles SET name = COALESCE($2, name), code = COALESCE($3, code), remark = COALESCE($4, remark), updated_at = now() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(patch.name)
            .bind(patch.code)
            .bind(patch.remark)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(map_write_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        if let Some(menu_ids) = patch.menu_ids {
            replace_role_menus(&mut tx, id, &menu_ids).await?;
        }
        tx.commit().await?;

        self.find_role(id).await?.ok_or(StoreError::NotFound)
    }

    async fn set_role_status(&self, id: i64, status: i16) -> Result<Role, StoreError> {
        let query = "UPDATE admin_roles SET status = $2, updated_at = now() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.find_role(id).await?.ok_or(StoreError::NotFound)
    }

    async fn delete_role(&self, id: i64) -> Result<(), StoreError> {
        // admin_user_roles rows go with it (ON DELETE CASCADE)
        let query = "DELETE FROM admin_roles WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_menu(&self, menu: NewMenu) -> Result<Menu, StoreError> {
        let query = concat!(
            "INSERT INTO admin_menus (parent_id, menu_type, title, name, path, component, icon, menu_rank, auths, show_link) ",
            "VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) ",
            "RETURNING id, parent_id, menu_type, title, name, path, component, icon, menu_rank, auths, show_link, created_at, updated_at"
        );
        let row = sqlx::query(query)
            .bind(menu.parent_id)
            .bind(menu.menu_type)
            .bind(menu.title)
            .bind(menu.name)
            .bind(menu.path)
            .bind(menu.component)
            .bind(menu.icon)
            .bind(menu.rank)
            .bind(menu.auths)
            .bind(menu.show_link)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(map_write_error)?;
        Ok(menu_from_row(&row)?)
    }

    async fn find_menu(&self, id: i64) -> Result<Option<Menu>, StoreError> {
        let query = menu_select!("WHERE id = $1");
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(row.as_ref().map(menu_from_row).transpose()?)
    }

    async fn list_menus(&self) -> Result<Vec<Menu>, StoreError> {
        let query = menu_select!("ORDER BY menu_rank, id");
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(rows.iter().map(menu_from_row).collect::<Result<_, _>>()?)
    }

    async fn update_menu(&self, id: i64, patch: MenuPatch) -> Result<Menu, StoreError> {
        let query = concat!(
            "UPDATE admin_menus SET parent_id = COALESCE($2, parent_id), menu_type = COALESCE($3, menu_type), ",
            "title = COALESCE($4, title), name = COALESCE($5, name), path = COALESCE($6, path), ",
            "component = COALESCE($7, component), icon = COALESCE($8, icon), menu_rank = COALESCE($9, menu_rank), ",
            "auths = COALESCE($10, auths), show_link = COALESCE($11, show_link), updated_at = now() WHERE id = $1 ",
            "RETURNING id, parent_id, menu_type, title, name, path, component, icon, menu_rank, auths, show_link, created_at, updated_at"
        );
        let row = sqlx::query(query)
            .bind(id)
            .bind(patch.parent_id)
            .bind(patch.menu_type)
            .bind(patch.title)
            .bind(patch.name)
            .bind(patch.path)
            .bind(patch.component)
            .bind(patch.icon)
            .bind(patch.rank)
            .bind(patch.auths)
            .bind(patch.show_link)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .map_err(map_write_error)?;
        row.as_ref()
            .map(menu_from_row)
            .transpose()?
            .ok_or(StoreError::NotFound)
    }

    async fn delete_menu(&self, id: i64) -> Result<(), StoreError> {
        let query = "SELECT EXISTS(SELECT 1 FROM admin_menus WHERE parent_id = $1) AS has_children";
        let has_children: bool = sqlx::query(query)
            .bind(id)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?
            .try_get("has_children")?;
        if has_children {
            return Err(StoreError::Conflict(
                "menu still has child entries".to_string(),
            ));
        }

        let query = "DELETE FROM admin_menus WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
