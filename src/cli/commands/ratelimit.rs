use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::config::DEFAULT_RATE_LIMIT_WINDOW_SECONDS;

pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_RATE_LIMIT_WINDOW_SECONDS: &str = "rate-limit-window-seconds";
pub const ARG_TRUST_PROXY: &str = "trust-proxy";

#[derive(Debug, Clone)]
pub struct Options {
    pub redis_url: Option<String>,
    pub window_seconds: u64,
    pub trust_proxy: bool,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            redis_url: matches
                .get_one::<String>(ARG_REDIS_URL)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
            window_seconds: matches
                .get_one::<u64>(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECONDS),
            trust_proxy: matches.get_flag(ARG_TRUST_PROXY),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis URL for shared rate limit counters")
                .long_help(
                    "Redis URL for shared rate limit counters. Without it counters live in this process only.",
                )
                .env("THIBOU_REDIS_URL"),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .long(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .help("Fixed window length in seconds")
                .env("THIBOU_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY)
                .long(ARG_TRUST_PROXY)
                .help("Key rate limits on x-forwarded-for / x-real-ip (behind a reverse proxy)")
                .env("THIBOU_TRUST_PROXY")
                .action(ArgAction::SetTrue),
        )
}
