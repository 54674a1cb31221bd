//! ES256 client assertions for provider-side API calls.

use base64ct::{Base64UrlUnpadded, Encoding};
use p256::{
    ecdsa::{Signature, SigningKey, signature::Signer},
    pkcs8::DecodePrivateKey,
};
use serde::Serialize;
use std::{fmt, fs, path::Path};

pub const APPLE_AUDIENCE: &str = "https://appleid.apple.com";
const ASSERTION_TTL_SECONDS: i64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to read signing key {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("signing key is not a PKCS#8 P-256 private key")]
    Parse,
    #[error("failed to encode client assertion")]
    Encode,
}

#[derive(Serialize)]
struct Header<'a> {
    alg: &'static str,
    kid: &'a str,
    typ: &'static str,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    iat: i64,
    exp: i64,
    aud: &'static str,
    sub: &'a str,
}

#[derive(Clone)]
pub struct ClientAssertionSigner {
    team_id: String,
    key_id: String,
    client_id: String,
    key: SigningKey,
}

impl fmt::Debug for ClientAssertionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAssertionSigner")
            .field("team_id", &self.team_id)
            .field("key_id", &self.key_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ClientAssertionSigner {
    /// # Errors
    /// Returns `KeyError::Parse` if `pem` is not a PKCS#8 P-256 key.
    pub fn from_pem(
        pem: &str,
        team_id: impl Into<String>,
        key_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self, KeyError> {
        let key = SigningKey::from_pkcs8_pem(pem).map_err(|_| KeyError::Parse)?;
        Ok(Self {
            team_id: team_id.into(),
            key_id: key_id.into(),
            client_id: client_id.into(),
            key,
        })
    }

    /// Read and parse a `.p8` key file.
    ///
    /// # Errors
    /// Returns `KeyError::Read` if the file is missing or unreadable, `KeyError::Parse` otherwise.
    pub fn from_pem_file(
        path: &Path,
        team_id: impl Into<String>,
        key_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self, KeyError> {
        let pem = fs::read_to_string(path).map_err(|source| KeyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(&pem, team_id, key_id, client_id)
    }

    /// Mint a one hour client assertion issued at `now`.
    ///
    /// # Errors
    /// Returns `KeyError::Encode` if the header or claims cannot be serialized.
    pub fn mint_at(&self, now: i64) -> Result<String, KeyError> {
        let header = serde_json::to_vec(&Header {
            alg: "ES256",
            kid: &self.key_id,
            typ: "JWT",
        })
        .map_err(|_| KeyError::Encode)?;
        let claims = serde_json::to_vec(&Claims {
            iss: &self.team_id,
            iat: now,
            exp: now + ASSERTION_TTL_SECONDS,
            aud: APPLE_AUDIENCE,
            sub: &self.client_id,
        })
        .map_err(|_| KeyError::Encode)?;

        let signing_input = format!(
            "{}.{}",
            Base64UrlUnpadded::encode_string(&header),
            Base64UrlUnpadded::encode_string(&claims)
        );
        let signature: Signature = self.key.sign(signing_input.as_bytes());
        Ok(format!(
            "{signing_input}.{}",
            Base64UrlUnpadded::encode_string(&signature.to_bytes())
        ))
    }
}
