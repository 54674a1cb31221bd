//! Process configuration, validated once at startup.
//!
//! Components get their slice by reference in their constructors; nothing
//! below the CLI reads the environment.

use secrecy::{ExposeSecret, SecretString};
use std::{path::PathBuf, time::Duration};

use crate::{
    auth::TokenSettings,
    sso::{
        AppleSettings, AppleVerifier, ClientAssertionSigner, Jwks, client_assertion::KeyError,
        jwks::JwksError,
    },
};

pub const MIN_SECRET_BYTES: usize = 32;
pub const DEFAULT_PORT: u16 = 3010;
pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_TOKEN_ISSUER: &str = "auth-api";
pub const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("jwt secret must be at least {MIN_SECRET_BYTES} bytes")]
    SecretTooShort,
    #[error("token ttl must be greater than zero")]
    ZeroTokenTtl,
    #[error("token issuer must not be empty")]
    EmptyIssuer,
    #[error("rate limit window must be greater than zero")]
    ZeroWindow,
    #[error("system key must not be empty")]
    EmptySystemKey,
    #[error("invalid frontend origin `{0}`")]
    InvalidOrigin(String),
    #[error("incomplete Apple configuration, missing: {0}")]
    IncompleteApple(String),
    #[error("Apple signing key: {0}")]
    AppleKey(#[from] KeyError),
    #[error("Apple provider keys: {0}")]
    AppleKeys(#[from] JwksError),
}

/// Sign in with Apple settings as given on the command line.
///
/// Either every required field is set or none is; a partial set is an error.
#[derive(Clone, Debug, Default)]
pub struct AppleOptions {
    pub client_id: Option<String>,
    pub client_id_ios: Option<String>,
    pub team_id: Option<String>,
    pub key_id: Option<String>,
    pub p8_key_path: Option<PathBuf>,
    pub jwks_path: Option<PathBuf>,
}

impl AppleOptions {
    fn is_empty(&self) -> bool {
        self.client_id.is_none()
            && self.client_id_ios.is_none()
            && self.team_id.is_none()
            && self.key_id.is_none()
            && self.p8_key_path.is_none()
            && self.jwks_path.is_none()
    }

    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.client_id.as_deref().is_none_or(str::is_empty) {
            missing.push("apple-client-id");
        }
        if self.team_id.as_deref().is_none_or(str::is_empty) {
            missing.push("apple-team-id");
        }
        if self.key_id.as_deref().is_none_or(str::is_empty) {
            missing.push("apple-key-id");
        }
        if self.p8_key_path.is_none() {
            missing.push("apple-p8-key-path");
        }
        missing
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: SecretString,
    pub token_ttl_seconds: u64,
    pub token_issuer: String,
    pub redis_url: Option<String>,
    pub rate_limit_window_seconds: u64,
    pub apple: AppleOptions,
    pub system_key: Option<SecretString>,
    pub frontend_origin: Option<String>,
    /// Key rate limits on `x-forwarded-for` / `x-real-ip` instead of the peer address.
    pub trust_proxy: bool,
}

impl Config {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            port: DEFAULT_PORT,
            jwt_secret,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            token_issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            redis_url: None,
            rate_limit_window_seconds: DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
            apple: AppleOptions::default(),
            system_key: None,
            frontend_origin: None,
            trust_proxy: false,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_token_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.token_issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_redis_url(mut self, url: Option<String>) -> Self {
        self.redis_url = url;
        self
    }

    #[must_use]
    pub fn with_rate_limit_window_seconds(mut self, seconds: u64) -> Self {
        self.rate_limit_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_apple(mut self, apple: AppleOptions) -> Self {
        self.apple = apple;
        self
    }

    #[must_use]
    pub fn with_system_key(mut self, key: Option<SecretString>) -> Self {
        self.system_key = key;
        self
    }

    #[must_use]
    pub fn with_frontend_origin(mut self, origin: Option<String>) -> Self {
        self.frontend_origin = origin;
        self
    }

    #[must_use]
    pub fn with_trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    /// Check every value that does not need file access.
    ///
    /// # Errors
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.expose_secret().len() < MIN_SECRET_BYTES {
            return Err(ConfigError::SecretTooShort);
        }
        if self.token_ttl_seconds == 0 {
            return Err(ConfigError::ZeroTokenTtl);
        }
        if self.token_issuer.trim().is_empty() {
            return Err(ConfigError::EmptyIssuer);
        }
        if self.rate_limit_window_seconds == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self
            .system_key
            .as_ref()
            .is_some_and(|key| key.expose_secret().is_empty())
        {
            return Err(ConfigError::EmptySystemKey);
        }
        if let Some(origin) = &self.frontend_origin
            && url::Url::parse(origin).is_err()
        {
            return Err(ConfigError::InvalidOrigin(origin.clone()));
        }
        if !self.apple.is_empty() {
            let missing = self.apple.missing();
            if !missing.is_empty() {
                return Err(ConfigError::IncompleteApple(missing.join(", ")));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            secret: self.jwt_secret.clone(),
            ttl: Duration::from_secs(self.token_ttl_seconds),
            issuer: self.token_issuer.clone(),
        }
    }

    #[must_use]
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_seconds)
    }

    /// Load the Apple signing key and optional provider keys.
    ///
    /// Returns `None` when Sign in with Apple is not configured.
    ///
    /// # Errors
    /// Returns an error if the settings are partial or a key file cannot be loaded.
    pub fn apple_verifier(&self) -> Result<Option<AppleVerifier>, ConfigError> {
        let apple = &self.apple;
        if apple.is_empty() {
            return Ok(None);
        }
        let (Some(client_id), Some(team_id), Some(key_id), Some(p8_key_path)) = (
            &apple.client_id,
            &apple.team_id,
            &apple.key_id,
            &apple.p8_key_path,
        ) else {
            return Err(ConfigError::IncompleteApple(apple.missing().join(", ")));
        };

        let signer = ClientAssertionSigner::from_pem_file(
            p8_key_path,
            team_id.clone(),
            key_id.clone(),
            client_id.clone(),
        )?;
        let jwks = apple
            .jwks_path
            .as_deref()
            .map(Jwks::from_file)
            .transpose()?;

        Ok(Some(AppleVerifier::new(AppleSettings {
            client_id: client_id.clone(),
            client_id_ios: apple.client_id_ios.clone(),
            signer,
            jwks,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn config() -> Config {
        Config::new(SecretString::from("x".repeat(MIN_SECRET_BYTES)))
    }

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let config = config();
        config.validate()?;
        assert_eq!(config.port, 3010);
        assert_eq!(config.token_settings().ttl, Duration::from_secs(604_800));
        assert_eq!(config.token_settings().issuer, "auth-api");
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
        assert!(config.apple_verifier()?.is_none());
        Ok(())
    }

    #[test]
    fn short_secret_is_fatal() {
        let config = Config::new(SecretString::from("short".to_string()));
        assert!(matches!(config.validate(), Err(ConfigError::SecretTooShort)));
    }

    #[test]
    fn zero_values_are_fatal() {
        assert!(matches!(
            config().with_token_ttl_seconds(0).validate(),
            Err(ConfigError::ZeroTokenTtl)
        ));
        assert!(matches!(
            config().with_rate_limit_window_seconds(0).validate(),
            Err(ConfigError::ZeroWindow)
        ));
        assert!(matches!(
            config().with_token_issuer(" ").validate(),
            Err(ConfigError::EmptyIssuer)
        ));
        assert!(matches!(
            config()
                .with_system_key(Some(SecretString::from(String::new())))
                .validate(),
            Err(ConfigError::EmptySystemKey)
        ));
        assert!(matches!(
            config()
                .with_frontend_origin(Some("not a url".to_string()))
                .validate(),
            Err(ConfigError::InvalidOrigin(_))
        ));
    }

    #[test]
    fn partial_apple_settings_are_fatal() {
        let config = config().with_apple(AppleOptions {
            client_id: Some("app.thibou".to_string()),
            ..AppleOptions::default()
        });
        match config.validate() {
            Err(ConfigError::IncompleteApple(missing)) => {
                assert_eq!(missing, "apple-team-id, apple-key-id, apple-p8-key-path");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn apple_key_file_is_loaded() -> Result<()> {
        use std::io::Write;

        let mut key_file = tempfile::NamedTempFile::new()?;
        key_file.write_all(crate::sso::client_assertion::tests::test_key_pem()?.as_bytes())?;

        let config = config().with_apple(AppleOptions {
            client_id: Some("app.thibou".to_string()),
            client_id_ios: Some("app.thibou.ios".to_string()),
            team_id: Some("TEAM".to_string()),
            key_id: Some("KEY".to_string()),
            p8_key_path: Some(key_file.path().to_path_buf()),
            jwks_path: None,
        });
        config.validate()?;
        let verifier = config.apple_verifier()?;
        assert_eq!(
            verifier.map(|v| v.audiences().to_vec()),
            Some(vec!["app.thibou".to_string(), "app.thibou.ios".to_string()])
        );
        Ok(())
    }

    #[test]
    fn missing_key_file_is_fatal() {
        let config = config().with_apple(AppleOptions {
            client_id: Some("app.thibou".to_string()),
            team_id: Some("TEAM".to_string()),
            key_id: Some("KEY".to_string()),
            p8_key_path: Some(PathBuf::from("/nonexistent/AuthKey.p8")),
            ..AppleOptions::default()
        });
        assert!(matches!(
            config.apple_verifier(),
            Err(ConfigError::AppleKey(KeyError::Read { .. }))
        ));
    }
}
