use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::config::{DEFAULT_TOKEN_ISSUER, DEFAULT_TOKEN_TTL_SECONDS};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_SYSTEM_KEY: &str = "system-key";

#[derive(Debug, Clone)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub ttl_seconds: u64,
    pub issuer: String,
    pub system_key: Option<SecretString>,
}

impl Options {
    /// Parse session token arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .cloned()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_JWT_SECRET}"))?;

        Ok(Self {
            jwt_secret: SecretString::from(jwt_secret),
            ttl_seconds: matches
                .get_one::<u64>(ARG_TOKEN_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_TOKEN_TTL_SECONDS),
            issuer: matches
                .get_one::<String>(ARG_TOKEN_ISSUER)
                .cloned()
                .unwrap_or_else(|| DEFAULT_TOKEN_ISSUER.to_string()),
            system_key: matches
                .get_one::<String>(ARG_SYSTEM_KEY)
                .cloned()
                .map(SecretString::from),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret for session tokens, at least 32 bytes")
                .env("THIBOU_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Session token lifetime in seconds")
                .env("THIBOU_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer tag stamped on session tokens")
                .env("THIBOU_TOKEN_ISSUER")
                .default_value(DEFAULT_TOKEN_ISSUER),
        )
        .arg(
            Arg::new(ARG_SYSTEM_KEY)
                .long(ARG_SYSTEM_KEY)
                .help("Shared key for service tokens; /auth/system is disabled without it")
                .env("THIBOU_SYSTEM_KEY")
                .hide_env_values(true),
        )
}
