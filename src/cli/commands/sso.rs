use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

use crate::config::AppleOptions;

pub const ARG_APPLE_CLIENT_ID: &str = "apple-client-id";
pub const ARG_APPLE_CLIENT_ID_IOS: &str = "apple-client-id-ios";
pub const ARG_APPLE_TEAM_ID: &str = "apple-team-id";
pub const ARG_APPLE_KEY_ID: &str = "apple-key-id";
pub const ARG_APPLE_P8_KEY_PATH: &str = "apple-p8-key-path";
pub const ARG_APPLE_JWKS_PATH: &str = "apple-jwks-path";

/// Collect the Sign in with Apple arguments; completeness is checked by `Config::validate`.
#[must_use]
pub fn parse(matches: &ArgMatches) -> AppleOptions {
    let string = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };
    let path = |id: &str| string(id).map(PathBuf::from);

    AppleOptions {
        client_id: string(ARG_APPLE_CLIENT_ID),
        client_id_ios: string(ARG_APPLE_CLIENT_ID_IOS),
        team_id: string(ARG_APPLE_TEAM_ID),
        key_id: string(ARG_APPLE_KEY_ID),
        p8_key_path: path(ARG_APPLE_P8_KEY_PATH),
        jwks_path: path(ARG_APPLE_JWKS_PATH),
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_APPLE_CLIENT_ID)
                .long(ARG_APPLE_CLIENT_ID)
                .help("Apple services id used as the primary audience")
                .env("THIBOU_APPLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_APPLE_CLIENT_ID_IOS)
                .long(ARG_APPLE_CLIENT_ID_IOS)
                .help("Apple bundle id accepted as a secondary audience")
                .env("THIBOU_APPLE_CLIENT_ID_IOS"),
        )
        .arg(
            Arg::new(ARG_APPLE_TEAM_ID)
                .long(ARG_APPLE_TEAM_ID)
                .help("Apple developer team id")
                .env("THIBOU_APPLE_TEAM_ID"),
        )
        .arg(
            Arg::new(ARG_APPLE_KEY_ID)
                .long(ARG_APPLE_KEY_ID)
                .help("Key id of the Sign in with Apple private key")
                .env("THIBOU_APPLE_KEY_ID"),
        )
        .arg(
            Arg::new(ARG_APPLE_P8_KEY_PATH)
                .long(ARG_APPLE_P8_KEY_PATH)
                .help("Path to the Sign in with Apple private key (.p8, PKCS#8 PEM)")
                .env("THIBOU_APPLE_P8_KEY_PATH"),
        )
        .arg(
            Arg::new(ARG_APPLE_JWKS_PATH)
                .long(ARG_APPLE_JWKS_PATH)
                .help("Path to Apple's public keys (JWKS); enables identity token signature checks")
                .env("THIBOU_APPLE_JWKS_PATH"),
        )
}
