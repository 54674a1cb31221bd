//! Sign in with Apple identity tokens.
//!
//! Checks run in a fixed order and stop at the first failure:
//! structure, optional signature (when provider keys are configured),
//! issuer, audience, expiry, age of `iat`, subject.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{
    Provider, Rejection, VerifiedIdentity,
    client_assertion::{APPLE_AUDIENCE, ClientAssertionSigner},
    jwks::Jwks,
};

pub const APPLE_ISSUER: &str = "https://appleid.apple.com";
const AUTHORIZE_URL: &str = "https://appleid.apple.com/auth/authorize";
const MAX_ASSERTION_AGE_SECONDS: i64 = 600;

/// Which client app is asking for the login URL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Principal,
    Ios,
}

#[derive(Clone, Debug)]
pub struct AppleSettings {
    pub client_id: String,
    pub client_id_ios: Option<String>,
    pub signer: ClientAssertionSigner,
    pub jwks: Option<Jwks>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginUrl {
    pub url: String,
    pub state: String,
    pub client_id: String,
}

#[derive(Debug, Deserialize)]
struct AssertionHeader {
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    kid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn is_true(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Text(s) => s == "true",
        }
    }
}

#[derive(Debug, Deserialize)]
struct AssertionClaims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<Flag>,
    #[serde(default)]
    name: Option<String>,
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, Rejection> {
    let bytes = Base64UrlUnpadded::decode_vec(segment).map_err(|_| Rejection::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| Rejection::Malformed)
}

#[derive(Debug)]
pub struct AppleVerifier {
    audiences: Vec<String>,
    client_id: String,
    client_id_ios: Option<String>,
    signer: ClientAssertionSigner,
    jwks: Option<Jwks>,
}

impl AppleVerifier {
    #[must_use]
    pub fn new(settings: AppleSettings) -> Self {
        let mut audiences = vec![settings.client_id.clone()];
        if let Some(ios) = &settings.client_id_ios
            && !audiences.contains(ios)
        {
            audiences.push(ios.clone());
        }
        if settings.jwks.is_none() {
            warn!("Apple provider keys not configured, identity token signatures are not checked");
        }
        Self {
            audiences,
            client_id: settings.client_id,
            client_id_ios: settings.client_id_ios,
            signer: settings.signer,
            jwks: settings.jwks,
        }
    }

    #[must_use]
    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// Verify an identity token against `now` (unix seconds).
    ///
    /// # Errors
    /// Returns the `Rejection` of the first failing check.
    pub fn verify_at(&self, assertion: &str, now: i64) -> Result<VerifiedIdentity, Rejection> {
        let mut parts = assertion.split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Rejection::Malformed);
        };
        if header_b64.is_empty() || claims_b64.is_empty() || sig_b64.is_empty() {
            return Err(Rejection::Malformed);
        }

        let header: AssertionHeader = decode_segment(header_b64)?;
        let claims: AssertionClaims = decode_segment(claims_b64)?;

        if let Some(jwks) = &self.jwks {
            let signature =
                Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Rejection::Malformed)?;
            if header.alg.as_deref() != Some("RS256") {
                return Err(Rejection::Signature);
            }
            let jwk = header
                .kid
                .as_deref()
                .and_then(|kid| jwks.find_by_kid(kid))
                .ok_or(Rejection::Signature)?;
            let signing_input = format!("{header_b64}.{claims_b64}");
            if !jwk.verify_rs256(signing_input.as_bytes(), &signature) {
                return Err(Rejection::Signature);
            }
        }

        if claims.iss.as_deref() != Some(APPLE_ISSUER) {
            return Err(Rejection::Issuer);
        }

        let audience = claims.aud.unwrap_or_default();
        if !self.audiences.contains(&audience) {
            return Err(Rejection::Audience(audience));
        }

        if claims.exp.is_none_or(|exp| now >= exp) {
            return Err(Rejection::Expired);
        }
        if claims.iat.is_none_or(|iat| {
            now.checked_sub(iat)
                .is_none_or(|age| age > MAX_ASSERTION_AGE_SECONDS)
        }) {
            return Err(Rejection::TooOld);
        }

        let subject = claims
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or(Rejection::MissingSubject)?;

        // Provider-side API calls authenticate with this assertion; it is not
        // part of the verified identity.
        match self.signer.mint_at(now) {
            Ok(_) => debug!("minted client assertion for {APPLE_AUDIENCE}"),
            Err(err) => {
                warn!("failed to mint client assertion: {err}");
                return Err(Rejection::Configuration);
            }
        }

        Ok(VerifiedIdentity {
            provider_id: subject,
            email: claims.email,
            email_verified: claims.email_verified.is_some_and(|flag| flag.is_true()),
            provider: Provider::Apple,
            name: claims.name,
            client_id: audience,
        })
    }

    /// Build the authorize URL, generating a random `state` when none is given.
    ///
    /// # Errors
    /// Returns `Rejection::Configuration` if the URL cannot be built.
    pub fn login_url(
        &self,
        redirect_uri: &str,
        state: Option<&str>,
        platform: Platform,
    ) -> Result<LoginUrl, Rejection> {
        let client_id = match platform {
            Platform::Ios => self.client_id_ios.as_ref().unwrap_or(&self.client_id),
            Platform::Principal => &self.client_id,
        };
        let state = state.map_or_else(random_state, str::to_string);

        let url = Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code id_token"),
                ("scope", "name email"),
                ("response_mode", "form_post"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|_| Rejection::Configuration)?;

        Ok(LoginUrl {
            url: url.to_string(),
            state,
            client_id: client_id.clone(),
        })
    }
}

fn random_state() -> String {
    rand::random::<[u8; 16]>()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
