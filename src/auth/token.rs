//! HS256 session tokens.
//!
//! Flow Overview:
//! 1) Resolve the scope set from the role (admin or standard user, no overrides).
//! 2) Stamp `iat`, `exp`, a fresh `jti`, the issuer tag and the token kind.
//! 3) Sign `base64url(header).base64url(claims)` with the process-wide secret.
//!
//! Verification recomputes the MAC with a constant-time comparison, then
//! enforces expiry against the verifier's clock. Callers only see
//! `TokenError`; the HTTP layer folds every variant into one
//! "invalid or expired" answer.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{sync::LazyLock, time::Duration};
use uuid::Uuid;

use super::scope::{Action, Scope};

type HmacSha256 = Hmac<Sha256>;

const ALG: &str = "HS256";
const SERVICE_TOKEN_ID: &str = "system-token";
const SERVICE_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

static ADMIN_SCOPES: LazyLock<Vec<Scope>> = LazyLock::new(|| {
    vec![
        Scope::global("user", Action::Admin),
        Scope::global("sso", Action::Admin),
        Scope::global("villager", Action::Admin),
        Scope::global("villager", Action::Write),
        Scope::global("villager", Action::Read),
        Scope::global("fish", Action::Admin),
        Scope::global("bug", Action::Admin),
        Scope::global("bug", Action::Write),
    ]
});

static USER_SCOPES: LazyLock<Vec<Scope>> = LazyLock::new(|| {
    vec![
        Scope::own("user", Action::Read),
        Scope::own("user", Action::Write),
        Scope::global("user", Action::Read),
        Scope::own("sso", Action::Read),
        Scope::own("sso", Action::Write),
        Scope::global("villager", Action::Read),
    ]
});

static SERVICE_SCOPES: LazyLock<Vec<Scope>> = LazyLock::new(|| {
    vec![
        Scope::global("villager", Action::Admin),
        Scope::global("bug", Action::Admin),
        Scope::global("fish", Action::Admin),
    ]
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    System,
}

impl Role {
    /// Fixed scope set granted to this role.
    #[must_use]
    pub fn scopes(self) -> &'static [Scope] {
        match self {
            Self::Admin => &ADMIN_SCOPES,
            Self::User => &USER_SCOPES,
            Self::System => &SERVICE_SCOPES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Principal,
    Service,
}

/// Who a session token speaks for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub scopes: Vec<Scope>,
}

/// Identity handed to `issue`; scopes are derived, never supplied.
#[derive(Clone, Debug)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user: Subject,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("failed to encode token")]
    Encode,
}

/// Settings for the session token codec.
#[derive(Clone, Debug)]
pub struct TokenSettings {
    pub secret: SecretString,
    pub ttl: Duration,
    pub issuer: String,
}

#[derive(Clone)]
pub struct SessionCodec {
    secret: SecretString,
    ttl_seconds: i64,
    issuer: String,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|_| TokenError::Encode)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

impl SessionCodec {
    #[must_use]
    pub fn new(settings: &TokenSettings) -> Self {
        Self {
            secret: settings.secret.clone(),
            ttl_seconds: i64::try_from(settings.ttl.as_secs()).unwrap_or(i64::MAX),
            issuer: settings.issuer.clone(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| TokenError::Encode)
    }

    /// Issue a principal token for `identity`, scoped by `role`.
    ///
    /// # Errors
    /// Returns `TokenError::Encode` if the claims cannot be serialized or signed.
    pub fn issue(&self, identity: &Identity, role: Role) -> Result<String, TokenError> {
        self.issue_at(identity, role, Utc::now().timestamp())
    }

    /// Same as [`Self::issue`], with an explicit issue time.
    ///
    /// # Errors
    /// Returns `TokenError::Encode` if the claims cannot be serialized or signed.
    pub fn issue_at(&self, identity: &Identity, role: Role, now: i64) -> Result<String, TokenError> {
        let claims = SessionClaims {
            user: Subject {
                id: identity.id.clone(),
                email: identity.email.clone(),
                name: identity.name.clone(),
                role,
                scopes: role.scopes().to_vec(),
            },
            iat: now,
            exp: now.saturating_add(self.ttl_seconds),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
            kind: TokenKind::Principal,
        };
        self.sign(&claims)
    }

    /// Issue the machine-to-machine token: fixed scopes, id and one hour lifetime.
    ///
    /// # Errors
    /// Returns `TokenError::Encode` if the claims cannot be serialized or signed.
    pub fn issue_service_token(&self) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            user: Subject {
                id: SERVICE_TOKEN_ID.to_string(),
                email: "system@local.dev".to_string(),
                name: "System Token".to_string(),
                role: Role::System,
                scopes: Role::System.scopes().to_vec(),
            },
            iat: now,
            exp: now.saturating_add(SERVICE_TOKEN_TTL.as_secs().cast_signed()),
            iss: self.issuer.clone(),
            jti: SERVICE_TOKEN_ID.to_string(),
            kind: TokenKind::Service,
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &SessionClaims) -> Result<String, TokenError> {
        let header = Header {
            alg: ALG.to_string(),
            typ: "JWT".to_string(),
        };
        let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(claims)?);
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        Ok(format!(
            "{signing_input}.{}",
            Base64UrlUnpadded::encode_string(&signature)
        ))
    }

    /// Verify a token against the current time.
    ///
    /// # Errors
    /// Returns `Malformed`, `InvalidSignature` or `Expired`.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify a token against `now` (unix seconds).
    ///
    /// # Errors
    /// Returns `Malformed`, `InvalidSignature` or `Expired`.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<SessionClaims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let claims_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let sig_b64 = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let header: Header = b64d_json(header_b64)?;
        if header.alg != ALG {
            return Err(TokenError::InvalidSignature);
        }

        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: SessionClaims = b64d_json(claims_b64)?;
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// Whether the token was issued within the last `max_age_minutes`.
///
/// Independent of the token's own expiry.
#[must_use]
pub fn is_recent(claims: &SessionClaims, max_age_minutes: u32) -> bool {
    is_recent_at(claims, max_age_minutes, Utc::now().timestamp())
}

#[must_use]
pub fn is_recent_at(claims: &SessionClaims, max_age_minutes: u32, now: i64) -> bool {
    now.checked_sub(claims.iat)
        .is_some_and(|age| age <= i64::from(max_age_minutes) * 60)
}
