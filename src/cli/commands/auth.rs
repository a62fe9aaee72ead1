use anyhow::{anyhow, Context, Result};
use clap::{builder::BoolishValueParser, Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_TOKEN_TTL_HOURS: &str = "token-ttl-hours";
pub const ARG_REFRESH_TTL_HOURS: &str = "refresh-ttl-hours";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_CAPTCHA_LOGIN: &str = "captcha-login";
pub const ARG_SEED_ADMIN: &str = "seed-admin";

#[derive(Debug)]
pub struct SeedAdmin {
    pub name: String,
    pub password: SecretString,
}

impl SeedAdmin {
    /// Parse `name:password`; the password may itself contain `:`.
    /// # Errors
    /// Returns an error if either part is empty.
    pub fn parse(value: &str) -> Result<Self> {
        let (name, password) = value
            .split_once(':')
            .ok_or_else(|| anyhow!("--{ARG_SEED_ADMIN} must look like name:password"))?;
        let name = name.trim();
        if name.is_empty() || password.is_empty() {
            return Err(anyhow!("--{ARG_SEED_ADMIN} must look like name:password"));
        }
        Ok(Self {
            name: name.to_string(),
            password: SecretString::from(password.to_string()),
        })
    }
}

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub token_ttl_hours: i64,
    pub refresh_ttl_hours: i64,
    pub issuer: String,
    pub captcha_login: bool,
    pub seed_admin: Option<SeedAdmin>,
}

impl Options {
    /// # Errors
    /// Returns an error if the secret is missing or the seed admin is malformed.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .cloned()
            .context("missing required argument: --jwt-secret")?;
        Ok(Self {
            jwt_secret: SecretString::from(jwt_secret),
            token_ttl_hours: matches
                .get_one::<i64>(ARG_TOKEN_TTL_HOURS)
                .copied()
                .unwrap_or(1),
            refresh_ttl_hours: matches
                .get_one::<i64>(ARG_REFRESH_TTL_HOURS)
                .copied()
                .unwrap_or(336),
            issuer: matches
                .get_one::<String>(ARG_ISSUER)
                .cloned()
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            captcha_login: matches.get_flag(ARG_CAPTCHA_LOGIN),
            seed_admin: matches
                .get_one::<String>(ARG_SEED_ADMIN)
                .map(|value| SeedAdmin::parse(value))
                .transpose()?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign bearer tokens")
                .env("BACKOFFICE_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_HOURS)
                .long(ARG_TOKEN_TTL_HOURS)
                .help("Access token TTL in hours")
                .env("BACKOFFICE_TOKEN_TTL_HOURS")
                .default_value("1")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_HOURS)
                .long(ARG_REFRESH_TTL_HOURS)
                .help("Hours after issue during which a token can still be refreshed")
                .env("BACKOFFICE_REFRESH_TTL_HOURS")
                .default_value("336")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Token issuer (iss claim)")
                .env("BACKOFFICE_ISSUER")
                .default_value("backoffice"),
        )
        .arg(
            Arg::new(ARG_CAPTCHA_LOGIN)
                .long(ARG_CAPTCHA_LOGIN)
                .help("Require a captcha on login")
                .env("BACKOFFICE_CAPTCHA_LOGIN")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_SEED_ADMIN)
                .long(ARG_SEED_ADMIN)
                .help("Bootstrap super admin as name:password, created when missing")
                .env("BACKOFFICE_SEED_ADMIN")
                .hide_env_values(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn seed_admin_parse() -> Result<()> {
        let seed = SeedAdmin::parse("admin:pa:ss")?;
        assert_eq!(seed.name, "admin");
        assert_eq!(seed.password.expose_secret(), "pa:ss");

        assert!(SeedAdmin::parse("admin").is_err());
        assert!(SeedAdmin::parse(":secret").is_err());
        assert!(SeedAdmin::parse("admin:").is_err());
        Ok(())
    }
}
