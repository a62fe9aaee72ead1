pub mod auth;
pub mod frontend;
pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};
use url::Url;

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";

/// Checks clap cannot express on its own.
///
/// # Errors
/// Returns an error string when the DSN is not a postgres URL or the frontend
/// base URL has no host.
pub fn validate(matches: &clap::ArgMatches) -> Result<(), String> {
    if let Some(dsn) = matches.get_one::<String>(ARG_DSN) {
        let scheme = Url::parse(dsn)
            .map(|url| url.scheme().to_string())
            .map_err(|err| format!("Invalid --{ARG_DSN}: {err}"))?;
        if scheme != "postgres" && scheme != "postgresql" {
            return Err(format!(
                "Invalid --{ARG_DSN}: expected a postgres:// URL, got {scheme}://"
            ));
        }
    }

    if let Some(url) = matches.get_one::<String>(frontend::ARG_FRONTEND_BASE_URL) {
        let has_host = Url::parse(url)
            .ok()
            .is_some_and(|url| url.host_str().is_some());
        if !has_host {
            return Err(format!(
                "Invalid --{}: {url}",
                frontend::ARG_FRONTEND_BASE_URL
            ));
        }
    }
    Ok(())
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("backoffice")
        .about("Admin panel backend")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("BACKOFFICE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .long_help(
                    "PostgreSQL connection string. Without it users, roles and menus live in memory and are lost on restart.",
                )
                .env("BACKOFFICE_DSN"),
        );

    let command = auth::with_args(command);
    let command = frontend::with_args(command);
    logging::with_args(command)
}
