//! In-memory [`Store`] used by tests and by runs without `--dsn`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{
    AdminUser, Menu, MenuPatch, NewMenu, NewRole, NewUser, Page, Paged, Role, RoleFilter,
    RolePatch, Store, StoreError, STATUS_ENABLED, UserFilter, UserPatch,
};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i64, AdminUser>,
    roles: BTreeMap<i64, Role>,
    menus: BTreeMap<i64, Menu>,
    next_user_id: i64,
    next_role_id: i64,
    next_menu_id: i64,
}

impl Tables {
    fn user_conflict(&self, id: Option<i64>, name: &str, email: &str, username: &str) -> Option<String> {
        self.users
            .values()
            .filter(|user| Some(user.id) != id)
            .find_map(|user| {
                if user.name == name {
                    Some(format!("name '{name}' is already taken"))
                } else if user.email == email {
                    Some(format!("email '{email}' is already taken"))
                } else if user.username == username {
                    Some(format!("username '{username}' is already taken"))
                } else {
                    None
                }
            })
    }

    fn role_conflict(&self, id: Option<i64>, code: &str) -> Option<String> {
        self.roles
            .values()
            .any(|role| Some(role.id) != id && role.code == code)
            .then(|| format!("role code '{code}' is already taken"))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn paginate<T: Clone>(rows: Vec<&T>, page: Page) -> Paged<T> {
    let total = rows.len() as u64;
    let list = rows
        .into_iter()
        .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
        .take(page.page_size as usize)
        .cloned()
        .collect();
    Paged {
        list,
        total,
        page_size: page.page_size,
        current_page: page.current_page,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> Result<AdminUser, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(conflict) = tables.user_conflict(None, &user.name, &user.email, &user.username)
        {
            return Err(StoreError::Conflict(conflict));
        }

        tables.next_user_id += 1;
        let now = Utc::now();
        let record = AdminUser {
            id: tables.next_user_id,
            name: user.name,
            email: user.email,
            username: user.username,
            nickname: user.nickname,
            avatar: String::new(),
            status: user.status,
            role_ids: user.role_ids,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_user(&self, id: i64) -> Result<Option<AdminUser>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<AdminUser>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|user| user.name == name)
            .cloned())
    }

    async fn list_users(
        &self,
        filter: &UserFilter,
        page: Page,
    ) -> Result<Paged<AdminUser>, StoreError> {
        let tables = self.tables.read().await;
        let rows = tables
            .users
            .values()
            .filter(|user| {
                filter.username.as_deref().map_or(true, |term| {
                    contains_ignore_case(&user.username, term) || contains_ignore_case(&user.name, term)
                })
            })
            .filter(|user| filter.status.map_or(true, |status| user.status == status))
            .collect();
        Ok(paginate(rows, page))
    }

    async fn update_user(&self, id: i64, patch: UserPatch) -> Result<AdminUser, StoreError> {
        let mut tables = self.tables.write().await;
        let current = tables.users.get(&id).cloned().ok_or(StoreError::NotFound)?;

        let name = patch.name.unwrap_or(current.name);
        let email = patch.email.unwrap_or(current.email);
        let username = patch.username.unwrap_or(current.username);
        if let Some(conflict) = tables.user_conflict(Some(id), &name, &email, &username) {
            return Err(StoreError::Conflict(conflict));
        }

        let updated = AdminUser {
            name,
            email,
            username,
            nickname: patch.nickname.unwrap_or(current.nickname),
            avatar: patch.avatar.unwrap_or(current.avatar),
            role_ids: patch.role_ids.unwrap_or(current.role_ids),
            updated_at: Utc::now(),
            ..current
        };
        tables.users.insert(id, updated.clone());
        Ok(updated)
    }

    async fn set_user_status(&self, id: i64, status: i16) -> Result<AdminUser, StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.status = status;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_user_password(&self, id: i64, password_hash: String) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .users
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn create_role(&self, role: NewRole) -> Result<Role, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(conflict) = tables.role_conflict(None, &role.code) {
            return Err(StoreError::Conflict(conflict));
        }

        tables.next_role_id += 1;
        let now = Utc::now();
        let record = Role {
            id: tables.next_role_id,
            name: role.name,
            code: role.code,
            remark: role.remark,
            status: role.status,
            menu_ids: role.menu_ids,
            created_at: now,
            updated_at: now,
        };
        tables.roles.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_role(&self, id: i64) -> Result<Option<Role>, StoreError> {
        Ok(self.tables.read().await.roles.get(&id).cloned())
    }

    async fn find_role_by_code(&self, code: &str) -> Result<Option<Role>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .roles
            .values()
            .find(|role| role.code == code)
            .cloned())
    }

    async fn all_roles(&self) -> Result<Vec<Role>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .roles
            .values()
            .filter(|role| role.status == STATUS_ENABLED)
            .cloned()
            .collect())
    }

    async fn list_roles(&self, filter: &RoleFilter, page: Page) -> Result<Paged<Role>, StoreError> {
        let tables = self.tables.read().await;
        let rows = tables
            .roles
            .values()
            .filter(|role| {
                filter
                    .name
                    .as_deref()
                    .map_or(true, |term| contains_ignore_case(&role.name, term))
            })
            .filter(|role| {
                filter
                    .code
                    .as_deref()
                    .map_or(true, |term| contains_ignore_case(&role.code, term))
            })
            .filter(|role| filter.status.map_or(true, |status| role.status == status))
            .collect();
        Ok(paginate(rows, page))
    }

    async fn update_role(&self, id: i64, patch: RolePatch) -> Result<Role, StoreError> {
        let mut tables = self.tables.write().await;
        let current = tables.roles.get(&id).cloned().ok_or(StoreError::NotFound)?;

        let code = patch.code.unwrap_or(current.code);
        if let Some(conflict) = tables.role_conflict(Some(id), &code) {
            return Err(StoreError::Conflict(conflict));
        }

        let updated = Role {
            name: patch.name.unwrap_or(current.name),
            code,
            remark: patch.remark.unwrap_or(current.remark),
            menu_ids: patch.menu_ids.unwrap_or(current.menu_ids),
            updated_at: Utc::now(),
            ..current
        };
        tables.roles.insert(id, updated.clone());
        Ok(updated)
    }

    async fn set_role_status(&self, id: i64, status: i16) -> Result<Role, StoreError> {
        let mut tables = self.tables.write().await;
        let role = tables.roles.get_mut(&id).ok_or(StoreError::NotFound)?;
        role.status = status;
        role.updated_at = Utc::now();
        Ok(role.clone())
    }

    async fn delete_role(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.roles.remove(&id).ok_or(StoreError::NotFound)?;
        for user in tables.users.values_mut() {
            user.role_ids.retain(|role_id| *role_id != id);
        }
        Ok(())
    }

    async fn create_menu(&self, menu: NewMenu) -> Result<Menu, StoreError> {
        let mut tables = self.tables.write().await;
        tables.next_menu_id += 1;
        let now = Utc::now();
        let record = Menu {
            id: tables.next_menu_id,
            parent_id: menu.parent_id,
            menu_type: menu.menu_type,
            title: menu.title,
            name: menu.name,
            path: menu.path,
            component: menu.component,
            icon: menu.icon,
            rank: menu.rank,
            auths: menu.auths,
            show_link: menu.show_link,
            created_at: now,
            updated_at: now,
        };
        tables.menus.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_menu(&self, id: i64) -> Result<Option<Menu>, StoreError> {
        Ok(self.tables.read().await.menus.get(&id).cloned())
    }

    async fn list_menus(&self) -> Result<Vec<Menu>, StoreError> {
        let mut menus: Vec<Menu> = self.tables.read().await.menus.values().cloned().collect();
        menus.sort_by_key(|menu| (menu.rank, menu.id));
        Ok(menus)
    }

    async fn update_menu(&self, id: i64, patch: MenuPatch) -> Result<Menu, StoreError> {
        let mut tables = self.tables.write().await;
        let current = tables.menus.get(&id).cloned().ok_or(StoreError::NotFound)?;
        let updated = Menu {
            parent_id: patch.parent_id.unwrap_or(current.parent_id),
            menu_type: patch.menu_type.unwrap_or(current.menu_type),
            title: patch.title.unwrap_or(current.title),
            name: patch.name.unwrap_or(current.name),
            path: patch.path.unwrap_or(current.path),
            component: patch.component.unwrap_or(current.component),
            icon: patch.icon.unwrap_or(current.icon),
            rank: patch.rank.unwrap_or(current.rank),
            auths: patch.auths.unwrap_or(current.auths),
            show_link: patch.show_link.unwrap_or(current.show_link),
            updated_at: Utc::now(),
            ..current
        };
        tables.menus.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete_menu(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.menus.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        if tables.menus.values().any(|menu| menu.parent_id == id) {
            return Err(StoreError::Conflict(
                "menu still has child entries".to_string(),
            ));
        }
        tables.menus.remove(&id);
        for role in tables.roles.values_mut() {
            role.menu_ids.retain(|menu_id| *menu_id != id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MENU_TYPE_BUTTON, MENU_TYPE_MENU, STATUS_DISABLED};
    use anyhow::Result;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: format!("{name}@example.com"),
            username: format!("{name}_login"),
            nickname: String::new(),
            password_hash: "hash".to_string(),
            status: STATUS_ENABLED,
            role_ids: Vec::new(),
        }
    }

    fn new_menu(parent_id: i64, title: &str, rank: i32) -> NewMenu {
        NewMenu {
            parent_id,
            menu_type: if parent_id == 0 {
                MENU_TYPE_MENU
            } else {
                MENU_TYPE_BUTTON
            },
            title: title.to_string(),
            name: title.to_lowercase(),
            path: format!("/{}", title.to_lowercase()),
            component: String::new(),
            icon: String::new(),
            rank,
            auths: String::new(),
            show_link: true,
        }
    }

    #[tokio::test]
    async fn create_user_rejects_duplicate_identity_fields() -> Result<()> {
        let store = MemoryStore::new();
        store.create_user(new_user("alice")).await?;

        let mut duplicate_email = new_user("bob");
        duplicate_email.email = "alice@example.com".to_string();
        let result = store.create_user(duplicate_email).await;
        assert!(matches!(result, Err(StoreError::Conflict(message)) if message.contains("email")));

        let result = store.create_user(new_user("alice")).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        Ok(())
    }

    #[tokio::test]
    async fn list_users_filters_and_paginates() -> Result<()> {
        let store = MemoryStore::new();
        for name in ["alice", "bob", "carol", "alina"] {
            store.create_user(new_user(name)).await?;
        }
        let bob = store.find_user_by_name("bob").await?.map(|user| user.id);
        if let Some(id) = bob {
            store.set_user_status(id, STATUS_DISABLED).await?;
        }

        let filter = UserFilter {
            username: Some("AL".to_string()),
            status: None,
        };
        let page = store.list_users(&filter, Page::default()).await?;
        assert_eq!(page.total, 2);

        let filter = UserFilter {
            username: None,
            status: Some(STATUS_ENABLED),
        };
        let page = store.list_users(&filter, Page::new(Some(2), Some(2))).await?;
        assert_eq!(page.total, 3);
        assert_eq!(page.list.len(), 1);
        assert_eq!(page.current_page, 2);
        Ok(())
    }

    #[tokio::test]
    async fn update_user_keeps_unpatched_fields() -> Result<()> {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("alice")).await?;
        let updated = store
            .update_user(
                user.id,
                UserPatch {
                    nickname: Some("Ali".to_string()),
                    ..UserPatch::default()
                },
            )
            .await?;
        assert_eq!(updated.nickname, "Ali");
        assert_eq!(updated.email, user.email);
        assert_eq!(updated.password_hash, user.password_hash);
        Ok(())
    }

    #[tokio::test]
    async fn delete_role_detaches_users() -> Result<()> {
        let store = MemoryStore::new();
        let role = store
            .create_role(NewRole {
                name: "Editor".to_string(),
                code: "editor".to_string(),
                remark: String::new(),
                status: STATUS_ENABLED,
                menu_ids: Vec::new(),
            })
            .await?;
        let mut user = new_user("alice");
        user.role_ids = vec![role.id];
        let user = store.create_user(user).await?;

        store.delete_role(role.id).await?;
        let reloaded = store.find_user(user.id).await?;
        assert_eq!(reloaded.map(|user| user.role_ids), Some(Vec::new()));
        Ok(())
    }

    #[tokio::test]
    async fn delete_menu_with_children_conflicts() -> Result<()> {
        let store = MemoryStore::new();
        let parent = store.create_menu(new_menu(0, "System", 1)).await?;
        let child = store.create_menu(new_menu(parent.id, "Users", 1)).await?;

        assert!(matches!(
            store.delete_menu(parent.id).await,
            Err(StoreError::Conflict(_))
        ));
        store.delete_menu(child.id).await?;
        store.delete_menu(parent.id).await?;
        assert!(matches!(
            store.delete_menu(parent.id).await,
            Err(StoreError::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn list_menus_orders_by_rank() -> Result<()> {
        let store = MemoryStore::new();
        store.create_menu(new_menu(0, "Second", 2)).await?;
        store.create_menu(new_menu(0, "First", 1)).await?;
        let titles: Vec<String> = store
            .list_menus()
            .await?
            .into_iter()
            .map(|menu| menu.title)
            .collect();
        assert_eq!(titles, vec!["First".to_string(), "Second".to_string()]);
        Ok(())
    }
}
