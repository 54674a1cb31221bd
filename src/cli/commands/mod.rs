pub mod logging;
pub mod ratelimit;
pub mod sso;
pub mod token;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_FRONTEND_ORIGIN: &str = "frontend-origin";

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

    let command = Command::new("thibou")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("3010")
                .env("THIBOU_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_FRONTEND_ORIGIN)
                .long(ARG_FRONTEND_ORIGIN)
                .help("Allowed CORS origin; any origin when unset")
                .env("THIBOU_FRONTEND_ORIGIN"),
        );

    let command = token::with_args(command);
    let command = ratelimit::with_args(command);
    let command = sso::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "thibou");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some(env!("CARGO_PKG_DESCRIPTION").to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars(
            [
                ("THIBOU_PORT", None::<&str>),
                ("THIBOU_TOKEN_TTL_SECONDS", None),
                ("THIBOU_TOKEN_ISSUER", None),
                ("THIBOU_RATE_LIMIT_WINDOW_SECONDS", None),
                ("THIBOU_TRUST_PROXY", None),
                ("THIBOU_LOG_LEVEL", None),
            ],
            || {
                let matches = new().get_matches_from(vec!["thibou", "--jwt-secret", SECRET]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(3010));
                assert_eq!(
                    matches
                        .get_one::<u64>(token::ARG_TOKEN_TTL_SECONDS)
                        .copied(),
                    Some(604_800)
                );
                assert_eq!(
                    matches.get_one::<String>(token::ARG_TOKEN_ISSUER).cloned(),
                    Some("auth-api".to_string())
                );
                assert_eq!(
                    matches
                        .get_one::<u64>(ratelimit::ARG_RATE_LIMIT_WINDOW_SECONDS)
                        .copied(),
                    Some(60)
                );
                assert!(!matches.get_flag(ratelimit::ARG_TRUST_PROXY));
                assert_eq!(matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(), Some(0));
            },
        );
    }

    #[test]
    fn test_jwt_secret_is_required() {
        temp_env::with_vars([("THIBOU_JWT_SECRET", None::<&str>)], || {
            let result = new().try_get_matches_from(vec!["thibou"]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("THIBOU_JWT_SECRET", Some(SECRET)),
                ("THIBOU_PORT", Some("8443")),
                ("THIBOU_REDIS_URL", Some("redis://127.0.0.1:6379")),
                ("THIBOU_TRUST_PROXY", Some("true")),
                ("THIBOU_APPLE_CLIENT_ID", Some("app.thibou")),
                ("THIBOU_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["thibou"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(8443));
                assert_eq!(
                    matches.get_one::<String>(token::ARG_JWT_SECRET).cloned(),
                    Some(SECRET.to_string())
                );
                assert_eq!(
                    matches.get_one::<String>(ratelimit::ARG_REDIS_URL).cloned(),
                    Some("redis://127.0.0.1:6379".to_string())
                );
                assert!(matches.get_flag(ratelimit::ARG_TRUST_PROXY));
                assert_eq!(
                    matches
                        .get_one::<String>(sso::ARG_APPLE_CLIENT_ID)
                        .cloned(),
                    Some("app.thibou".to_string())
                );
                assert_eq!(matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(), Some(2));
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(
                [
                    ("THIBOU_LOG_LEVEL", Some(level)),
                    ("THIBOU_JWT_SECRET", Some(SECRET)),
                ],
                || {
                    let matches = new().get_matches_from(vec!["thibou"]);
                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        u8::try_from(index).ok()
                    );
                },
            );
        }
    }

    #[test]
    fn test_verbosity_flag_counts() {
        temp_env::with_vars([("THIBOU_LOG_LEVEL", None::<&str>)], || {
            let matches = new().get_matches_from(vec!["thibou", "--jwt-secret", SECRET, "-vvv"]);
            assert_eq!(matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(), Some(3));
        });
    }
}
