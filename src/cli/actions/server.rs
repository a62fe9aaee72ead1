use crate::{
    api::{self, auth::AuthConfig, auth::password::hash_password, handlers::SUPER_ADMIN_ROLE},
    cli::commands::auth::SeedAdmin,
    store::{AdminUser, MemoryStore, NewRole, NewUser, PgStore, Store, STATUS_ENABLED},
};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub auth_config: AuthConfig,
    pub seed_admin: Option<SeedAdmin>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, seeding fails, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let store: Arc<dyn Store> = match &args.dsn {
        Some(dsn) => Arc::new(
            PgStore::connect(dsn)
                .await
                .context("Failed to connect to database")?,
        ),
        None => {
            warn!("No DSN given, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    if let Some(seed) = &args.seed_admin {
        ensure_admin(store.as_ref(), seed).await?;
    }

    api::new(args.port, store, args.auth_config).await
}

/// Create the super-admin role and user when they do not exist yet.
/// # Errors
/// Returns an error if the store fails or the password cannot be hashed.
pub async fn ensure_admin(store: &dyn Store, seed: &SeedAdmin) -> Result<AdminUser> {
    let role = match store.find_role_by_code(SUPER_ADMIN_ROLE).await? {
        Some(role) => role,
        None => {
            info!("Creating role {SUPER_ADMIN_ROLE}");
            store
                .create_role(NewRole {
                    name: "Administrator".to_string(),
                    code: SUPER_ADMIN_ROLE.to_string(),
                    remark: "Every permission".to_string(),
                    status: STATUS_ENABLED,
                    menu_ids: Vec::new(),
                })
                .await?
        }
    };

    if let Some(user) = store.find_user_by_name(&seed.name).await? {
        if !user.role_ids.contains(&role.id) {
            warn!(
                "User {} exists without the {SUPER_ADMIN_ROLE} role, leaving it unchanged",
                user.name
            );
        }
        return Ok(user);
    }

    let password_hash = hash_password(seed.password.expose_secret().to_string()).await?;
    let user = store
        .create_user(NewUser {
            name: seed.name.clone(),
            email: format!("{}@localhost", seed.name),
            username: seed.name.clone(),
            nickname: seed.name.clone(),
            password_hash,
            status: STATUS_ENABLED,
            role_ids: vec![role.id],
        })
        .await?;
    info!("Created admin user {}", user.name);
    Ok(user)
}
