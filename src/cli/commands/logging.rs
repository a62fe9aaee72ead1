use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_LEVEL: &str = "log-level";

/// Accepts a level name (`info`) or its number, `0` (error) to `4` (trace).
#[must_use]
pub fn level_parser() -> ValueParser {
    ValueParser::from(|raw: &str| -> Result<Level, String> {
        let level = match raw.trim().to_lowercase().as_str() {
            "0" | "error" => Level::ERROR,
            "1" | "warn" => Level::WARN,
            "2" | "info" => Level::INFO,
            "3" | "debug" => Level::DEBUG,
            "4" | "5" | "trace" => Level::TRACE,
            other => return Err(format!("invalid log level: {other}")),
        };
        Ok(level)
    })
}

/// `-v` count mapped to a level; no flag leaves the env filter in charge.
#[must_use]
pub const fn verbosity_level(count: u8) -> Option<Level> {
    match count {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

/// An explicit `--log-level` wins over `-v`.
#[must_use]
pub fn level(matches: &ArgMatches) -> Option<Level> {
    matches
        .get_one::<Level>(ARG_LOG_LEVEL)
        .copied()
        .or_else(|| verbosity_level(matches.get_count(ARG_VERBOSITY)))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Increase verbosity: -v WARN, -vv INFO, -vvv DEBUG, -vvvv TRACE")
                .global(true)
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new(ARG_LOG_LEVEL)
                .long("log-level")
                .help("Log level: error, warn, info, debug, trace")
                .env("BACKOFFICE_LOG_LEVEL")
                .global(true)
                .value_parser(level_parser()),
        )
}
