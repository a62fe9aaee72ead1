//! Map validated CLI arguments to the action to run.

use crate::{
    api::auth::AuthConfig,
    cli::{
        actions::{server::Args, Action},
        commands::{self, auth, frontend},
    },
};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches.get_one::<String>(commands::ARG_DSN).cloned();

    let auth_opts = auth::Options::parse(matches)?;
    let frontend_opts = frontend::Options::parse(matches)?;

    let auth_config = AuthConfig::new(auth_opts.jwt_secret)
        .with_token_ttl_hours(auth_opts.token_ttl_hours)
        .with_refresh_ttl_hours(auth_opts.refresh_ttl_hours)
        .with_issuer(auth_opts.issuer)
        .with_captcha_login(auth_opts.captcha_login)
        .with_frontend_base_url(frontend_opts.frontend_base_url)
        .with_throttle(
            frontend_opts.throttle_max_attempts,
            frontend_opts.throttle_decay_minutes,
        )
        .with_app_title(frontend_opts.app_title);

    Ok(Action::Server(Args {
        port,
        dsn,
        auth_config,
        seed_admin: auth_opts.seed_admin,
    }))
}
