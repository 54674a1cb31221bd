//! Map validated CLI arguments to an action.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_FRONTEND_ORIGIN, ARG_PORT, ratelimit, sso, token};
use crate::config::{Config, DEFAULT_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(ARG_PORT)
        .copied()
        .unwrap_or(DEFAULT_PORT);
    let frontend_origin = matches
        .get_one::<String>(ARG_FRONTEND_ORIGIN)
        .cloned()
        .filter(|v| !v.trim().is_empty());

    let token_opts = token::Options::parse(matches)?;
    let rate_opts = ratelimit::Options::parse(matches);
    let apple = sso::parse(matches);

    let config = Config::new(token_opts.jwt_secret)
        .with_port(port)
        .with_token_ttl_seconds(token_opts.ttl_seconds)
        .with_token_issuer(token_opts.issuer)
        .with_system_key(token_opts.system_key)
        .with_redis_url(rate_opts.redis_url)
        .with_rate_limit_window_seconds(rate_opts.window_seconds)
        .with_trust_proxy(rate_opts.trust_proxy)
        .with_apple(apple)
        .with_frontend_origin(frontend_origin);

    Ok(Action::Server(Args { config }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;
    use std::path::PathBuf;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn builds_server_config() {
        temp_env::with_vars(
            [
                ("THIBOU_JWT_SECRET", Some(SECRET)),
                ("THIBOU_TOKEN_ISSUER", Some("nook-api")),
                ("THIBOU_SYSTEM_KEY", Some("resetti")),
                ("THIBOU_APPLE_CLIENT_ID", Some("app.thibou")),
                ("THIBOU_APPLE_P8_KEY_PATH", Some("/etc/thibou/AuthKey.p8")),
                ("THIBOU_REDIS_URL", None),
                ("THIBOU_PORT", None),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["thibou"]);
                let action = handler(&matches);
                assert!(action.is_ok());
                if let Ok(Action::Server(args)) = action {
                    let config = args.config;
                    assert_eq!(config.port, DEFAULT_PORT);
                    assert_eq!(config.jwt_secret.expose_secret(), SECRET);
                    assert_eq!(config.token_issuer, "nook-api");
                    assert_eq!(
                        config.system_key.as_ref().map(|k| k.expose_secret().to_string()),
                        Some("resetti".to_string())
                    );
                    assert_eq!(config.redis_url, None);
                    assert_eq!(config.apple.client_id.as_deref(), Some("app.thibou"));
                    assert_eq!(
                        config.apple.p8_key_path,
                        Some(PathBuf::from("/etc/thibou/AuthKey.p8"))
                    );
                }
            },
        );
    }

    #[test]
    fn empty_secret_is_rejected() {
        temp_env::with_vars([("THIBOU_JWT_SECRET", None::<&str>)], || {
            let matches = commands::new().get_matches_from(vec!["thibou", "--jwt-secret", ""]);
            assert!(handler(&matches).is_err());
        });
    }
}
