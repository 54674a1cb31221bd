use crate::{api, config::Config};
use anyhow::{Context, Result};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub config: Config,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let config = args.config;
    config.validate().context("Invalid configuration")?;
    log_startup_args(&config);

    let result = api::new(config).await;
    crate::cli::telemetry::shutdown_tracer();
    result
}

fn log_startup_args(config: &Config) {
    let set = |present: bool| if present { "set" } else { "unset" }.to_string();
    let entries = [
        ("listen", format!("tcp:{}", config.port)),
        ("token_issuer", config.token_issuer.clone()),
        ("token_ttl_seconds", config.token_ttl_seconds.to_string()),
        (
            "rate_limit_store",
            config
                .redis_url
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_url),
        ),
        (
            "rate_limit_window_seconds",
            config.rate_limit_window_seconds.to_string(),
        ),
        ("trust_proxy", config.trust_proxy.to_string()),
        (
            "apple_client_id",
            config
                .apple
                .client_id
                .clone()
                .unwrap_or_else(|| "n/a".to_string()),
        ),
        ("apple_jwks", set(config.apple.jwks_path.is_some())),
        ("system_key", set(config.system_key.is_some())),
        (
            "frontend_origin",
            config
                .frontend_origin
                .clone()
                .unwrap_or_else(|| "*".to_string()),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-url".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
