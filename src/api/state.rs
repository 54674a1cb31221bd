//! Shared request state, installed once as an `Extension`.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::{
    accounts::AccountStore,
    auth::{PasswordHasher, SessionCodec},
    ratelimit::RateLimiter,
    sso::SsoVerifier,
};

pub struct AppState {
    pub codec: SessionCodec,
    pub hasher: PasswordHasher,
    pub limiter: RateLimiter,
    pub sso: SsoVerifier,
    pub accounts: Arc<dyn AccountStore>,
    pub system_key: Option<SecretString>,
    pub trust_proxy: bool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("codec", &self.codec)
            .field("limiter", &self.limiter)
            .field("sso", &self.sso)
            .field("trust_proxy", &self.trust_proxy)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Constant-time comparison against the configured system key.
    ///
    /// Always false when no key is configured.
    #[must_use]
    pub fn system_key_matches(&self, candidate: &str) -> bool {
        self.system_key.as_ref().is_some_and(|key| {
            bool::from(key.expose_secret().as_bytes().ct_eq(candidate.as_bytes()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accounts::MemoryAccountStore,
        auth::TokenSettings,
        ratelimit::MemoryCounterStore,
    };
    use std::time::Duration;

    fn state(system_key: Option<&str>) -> AppState {
        AppState {
            codec: SessionCodec::new(&TokenSettings {
                secret: SecretString::from("k".repeat(32)),
                ttl: Duration::from_secs(60),
                issuer: "auth-api".to_string(),
            }),
            hasher: PasswordHasher::new(),
            limiter: RateLimiter::new(Arc::new(MemoryCounterStore::new()), Duration::from_secs(60)),
            sso: SsoVerifier::default(),
            accounts: Arc::new(MemoryAccountStore::new()),
            system_key: system_key.map(|key| SecretString::from(key.to_string())),
            trust_proxy: false,
        }
    }

    #[test]
    fn system_key_comparison() {
        let configured = state(Some("resetti"));
        assert!(configured.system_key_matches("resetti"));
        assert!(!configured.system_key_matches("resetti "));
        assert!(!configured.system_key_matches(""));

        let unset = state(None);
        assert!(!unset.system_key_matches(""));
        assert!(!unset.system_key_matches("resetti"));
    }
}
