pub mod auth;
pub mod captcha;
pub mod config;
pub mod health;
pub mod menus;
pub mod roles;
pub mod root;
pub mod users;

// common functions for the handlers
use super::{error::ApiError, utils::valid_email};
use crate::store::{AdminUser, Store, StoreError, MENU_TYPE_BUTTON, STATUS_DISABLED, STATUS_ENABLED};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query,
    },
    Json,
};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt::Display,
    str::FromStr,
};
use utoipa::{IntoParams, ToSchema};

/// Role code whose holders get every permission.
pub const SUPER_ADMIN_ROLE: &str = "admin";
pub const ALL_PERMISSIONS: &str = "*:*:*";

/// Collects field errors the way the admin frontend expects them.
#[derive(Debug, Default)]
pub(crate) struct Validator {
    errors: BTreeMap<String, Vec<String>>,
    first: Option<String>,
}

impl Validator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail(&mut self, field: &str, message: String) {
        if self.first.is_none() {
            self.first = Some(message.clone());
        }
        self.errors.entry(field.to_string()).or_default().push(message);
    }

    pub(crate) fn check(&mut self, ok: bool, field: &str, message: impl Into<String>) {
        if !ok {
            self.fail(field, message.into());
        }
    }

    pub(crate) fn required(&mut self, field: &str, value: &str) {
        self.check(
            !value.trim().is_empty(),
            field,
            format!("The {field} field is required."),
        );
    }

    pub(crate) fn email(&mut self, field: &str, value: &str) {
        if !value.trim().is_empty() {
            self.check(
                valid_email(value.trim()),
                field,
                format!("The {field} must be a valid email address."),
            );
        }
    }

    pub(crate) fn min_len(&mut self, field: &str, value: &str, min: usize) {
        if !value.is_empty() {
            self.check(
                value.chars().count() >= min,
                field,
                format!("The {field} must be at least {min} characters."),
            );
        }
    }

    pub(crate) fn status(&mut self, field: &str, value: i16) {
        self.check(
            value == STATUS_ENABLED || value == STATUS_DISABLED,
            field,
            format!("The selected {field} is invalid."),
        );
    }

    pub(crate) fn finish(self) -> Result<(), ApiError> {
        match self.first {
            None => Ok(()),
            Some(message) => Err(ApiError::Validation {
                message,
                errors: self.errors,
            }),
        }
    }
}

pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::invalid_field("body", rejection.body_text()))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| ApiError::invalid_field("query", rejection.body_text()))
}

/// Treat missing and empty query values alike (`?status=`).
pub(crate) fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(de::Error::custom),
    }
}

pub(crate) fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IdRequest {
    pub id: i64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IdQuery {
    pub id: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusRequest {
    pub id: i64,
    pub status: i16,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Enabled role codes of `user` and the permissions they grant.
///
/// Holders of the super admin role get `*:*:*`; everyone else gets the
/// `auths` of the button menus attached to their roles.
pub(crate) async fn roles_and_permissions(
    store: &dyn Store,
    user: &AdminUser,
) -> Result<(Vec<String>, Vec<String>), StoreError> {
    let roles: Vec<_> = store
        .all_roles()
        .await?
        .into_iter()
        .filter(|role| user.role_ids.contains(&role.id))
        .collect();
    let codes: Vec<String> = roles.iter().map(|role| role.code.clone()).collect();

    if codes.iter().any(|code| code == SUPER_ADMIN_ROLE) {
        return Ok((codes, vec![ALL_PERMISSIONS.to_string()]));
    }

    let menu_ids: HashSet<i64> = roles
        .iter()
        .flat_map(|role| role.menu_ids.iter().copied())
        .collect();
    let permissions: BTreeSet<String> = store
        .list_menus()
        .await?
        .into_iter()
        .filter(|menu| menu.menu_type == MENU_TYPE_BUTTON && menu_ids.contains(&menu.id))
        .map(|menu| menu.auths.trim().to_string())
        .filter(|auths| !auths.is_empty())
        .collect();

    Ok((codes, permissions.into_iter().collect()))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewMenu, NewRole, NewUser, MENU_TYPE_MENU};

    fn menu(menu_type: i16, auths: &str) -> NewMenu {
        NewMenu {
            parent_id: 0,
            menu_type,
            title: "menu".to_string(),
            name: String::new(),
            path: String::new(),
            component: String::new(),
            icon: String::new(),
            rank: 0,
            auths: auths.to_string(),
            show_link: true,
        }
    }

    fn user(role_ids: Vec<i64>) -> NewUser {
        NewUser {
            name: "alice".to_string(),
            email: "alice@example.com".to_string(),
            username: "alice".to_string(),
            nickname: String::new(),
            password_hash: String::new(),
            status: STATUS_ENABLED,
            role_ids,
        }
    }

    #[test]
    fn validator_collects_field_errors() {
        let mut validator = Validator::new();
        validator.required("name", " ");
        validator.email("email", "nope");
        validator.min_len("password", "abc", 6);
        validator.status("status", 7);
        let Err(ApiError::Validation { message, errors }) = validator.finish() else {
            panic!("expected validation error");
        };
        assert_eq!(message, "The name field is required.");
        assert_eq!(errors.len(), 4);
        assert!(errors.contains_key("password"));
    }

    #[test]
    fn validator_passes_clean_input() {
        let mut validator = Validator::new();
        validator.required("name", "alice");
        validator.email("email", "alice@example.com");
        validator.min_len("password", "secret1", 6);
        validator.status("status", STATUS_ENABLED);
        assert!(validator.finish().is_ok());
    }

    #[derive(Deserialize)]
    struct Filter {
        #[serde(default, deserialize_with = "empty_as_none")]
        status: Option<i16>,
    }

    #[test]
    fn empty_query_values_are_none() {
        let parsed: Filter = parse_filter("status=");
        assert_eq!(parsed.status, None);
        let parsed: Filter = parse_filter("status=1");
        assert_eq!(parsed.status, Some(1));
        let parsed: Filter = parse_filter("");
        assert_eq!(parsed.status, None);
    }

    fn parse_filter(query: &str) -> Filter {
        let uri: axum::http::Uri = format!("/?{query}").parse().expect("uri");
        Query::<Filter>::try_from_uri(&uri).expect("query").0
    }

    #[tokio::test]
    async fn permissions_come_from_button_menus() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let button = store.create_menu(menu(MENU_TYPE_BUTTON, "user:add")).await?;
        let page = store.create_menu(menu(MENU_TYPE_MENU, "ignored")).await?;
        let role = store
            .create_role(NewRole {
                name: "Editor".to_string(),
                code: "editor".to_string(),
                remark: String::new(),
                status: STATUS_ENABLED,
                menu_ids: vec![button.id, page.id],
            })
            .await?;
        let user = store.create_user(user(vec![role.id])).await?;

        let (roles, permissions) = roles_and_permissions(&store, &user).await?;
        assert_eq!(roles, vec!["editor".to_string()]);
        assert_eq!(permissions, vec!["user:add".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn super_admin_gets_every_permission() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let role = store
            .create_role(NewRole {
                name: "Admin".to_string(),
                code: SUPER_ADMIN_ROLE.to_string(),
                remark: String::new(),
                status: STATUS_ENABLED,
                menu_ids: Vec::new(),
            })
            .await?;
        let user = store.create_user(user(vec![role.id])).await?;

        let (roles, permissions) = roles_and_permissions(&store, &user).await?;
        assert_eq!(roles, vec![SUPER_ADMIN_ROLE.to_string()]);
        assert_eq!(permissions, vec![ALL_PERMISSIONS.to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn disabled_roles_grant_nothing() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let role = store
            .create_role(NewRole {
                name: "Admin".to_string(),
                code: SUPER_ADMIN_ROLE.to_string(),
                remark: String::new(),
                status: STATUS_DISABLED,
                menu_ids: Vec::new(),
            })
            .await?;
        let user = store.create_user(user(vec![role.id])).await?;

        let (roles, permissions) = roles_and_permissions(&store, &user).await?;
        assert!(roles.is_empty());
        assert!(permissions.is_empty());
        Ok(())
    }
}
