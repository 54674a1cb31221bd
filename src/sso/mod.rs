//! Federated identity verification.
//!
//! Flow Overview:
//! 1) Resolve the provider name; anything but `apple` is refused before configuration is read.
//! 2) Check the provider is configured.
//! 3) Run the provider's assertion checks and return a `VerifiedIdentity`.
//!
//! Rejections carry the failing step for logs. The HTTP layer reports all of
//! them as one opaque failure.

pub mod apple;
pub mod client_assertion;
pub mod jwks;

use chrono::Utc;
use serde::Serialize;
use std::{fmt, str::FromStr};

pub use self::apple::{AppleSettings, AppleVerifier, LoginUrl, Platform};
pub use self::client_assertion::ClientAssertionSigner;
pub use self::jwks::{Jwk, Jwks};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Apple,
}

impl Provider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Apple => "apple",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apple" => Ok(Self::Apple),
            other => Err(Rejection::UnsupportedProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("unsupported provider `{0}`")]
    UnsupportedProvider(String),
    #[error("provider is not configured")]
    Configuration,
    #[error("malformed assertion")]
    Malformed,
    #[error("assertion signature does not match provider keys")]
    Signature,
    #[error("unexpected issuer")]
    Issuer,
    #[error("audience `{0}` is not allowed")]
    Audience(String),
    #[error("assertion expired")]
    Expired,
    #[error("assertion issued too long ago")]
    TooOld,
    #[error("assertion has no subject")]
    MissingSubject,
}

/// External identity extracted from a verified assertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedIdentity {
    pub provider_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub provider: Provider,
    pub name: Option<String>,
    pub client_id: String,
}

#[derive(Debug, Default)]
pub struct SsoVerifier {
    apple: Option<AppleVerifier>,
}

impl SsoVerifier {
    #[must_use]
    pub fn new(apple: Option<AppleVerifier>) -> Self {
        Self { apple }
    }

    fn apple(&self) -> Result<&AppleVerifier, Rejection> {
        self.apple.as_ref().ok_or(Rejection::Configuration)
    }

    /// Verify an assertion for `provider` against the current time.
    ///
    /// # Errors
    /// Returns the `Rejection` of the first failing check.
    pub fn verify(&self, provider: &str, assertion: &str) -> Result<VerifiedIdentity, Rejection> {
        self.verify_at(provider, assertion, Utc::now().timestamp())
    }

    /// Verify an assertion for `provider` against `now` (unix seconds).
    ///
    /// # Errors
    /// Returns the `Rejection` of the first failing check.
    pub fn verify_at(
        &self,
        provider: &str,
        assertion: &str,
        now: i64,
    ) -> Result<VerifiedIdentity, Rejection> {
        match provider.parse::<Provider>()? {
            Provider::Apple => self.apple()?.verify_at(assertion, now),
        }
    }

    /// Build the provider's authorize URL.
    ///
    /// # Errors
    /// Returns `UnsupportedProvider` or `Configuration`.
    pub fn login_url(
        &self,
        provider: &str,
        redirect_uri: &str,
        state: Option<&str>,
        platform: Platform,
    ) -> Result<LoginUrl, Rejection> {
        match provider.parse::<Provider>()? {
            Provider::Apple => self.apple()?.login_url(redirect_uri, state, platform),
        }
    }
}
