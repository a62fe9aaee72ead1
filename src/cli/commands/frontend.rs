use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_THROTTLE_MAX_ATTEMPTS: &str = "throttle-max-attempts";
pub const ARG_THROTTLE_DECAY_MINUTES: &str = "throttle-decay-minutes";
pub const ARG_APP_TITLE: &str = "app-title";

#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub throttle_max_attempts: u32,
    pub throttle_decay_minutes: u64,
    pub app_title: String,
}

impl Options {
    /// # Errors
    /// Currently infallible; kept fallible like the other option groups.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_else(|| "http://localhost:8848".to_string()),
            throttle_max_attempts: matches
                .get_one::<u32>(ARG_THROTTLE_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(100),
            throttle_decay_minutes: matches
                .get_one::<u64>(ARG_THROTTLE_DECAY_MINUTES)
                .copied()
                .unwrap_or(30),
            app_title: matches
                .get_one::<String>(ARG_APP_TITLE)
                .cloned()
                .unwrap_or_else(|| "Backoffice".to_string()),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Admin panel origin allowed by CORS")
                .env("BACKOFFICE_FRONTEND_BASE_URL")
                .default_value("http://localhost:8848"),
        )
        .arg(
            Arg::new(ARG_THROTTLE_MAX_ATTEMPTS)
                .long(ARG_THROTTLE_MAX_ATTEMPTS)
                .help("Requests allowed per client on /getConfig and /captchaImage per window")
                .env("BACKOFFICE_THROTTLE_MAX_ATTEMPTS")
                .default_value("100")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_THROTTLE_DECAY_MINUTES)
                .long(ARG_THROTTLE_DECAY_MINUTES)
                .help("Throttle window in minutes")
                .env("BACKOFFICE_THROTTLE_DECAY_MINUTES")
                .default_value("30")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_APP_TITLE)
                .long(ARG_APP_TITLE)
                .help("Title served by /getConfig")
                .env("BACKOFFICE_APP_TITLE")
                .default_value("Backoffice"),
        )
}
