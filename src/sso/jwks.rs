//! Provider public keys and RS256 assertion signatures.

use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::{
    BigUint, RsaPublicKey,
    pkcs1v15::{Signature, VerifyingKey},
    signature::Verifier,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{fs, path::Path};

#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    #[error("failed to read key set {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid key set JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("key set is empty")]
    Empty,
    #[error("invalid base64url value")]
    Base64,
    #[error("invalid RSA key: {0}")]
    Rsa(#[from] rsa::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Parse a key set from JSON.
    ///
    /// # Errors
    /// Returns an error if `s` is not a JWKS document or holds no keys.
    pub fn from_json(s: &str) -> Result<Self, JwksError> {
        let jwks: Self = serde_json::from_str(s)?;
        if jwks.keys.is_empty() {
            return Err(JwksError::Empty);
        }
        Ok(jwks)
    }

    /// Load a key set saved from the provider's keys endpoint.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, JwksError> {
        let json = fs::read_to_string(path).map_err(|source| JwksError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    pub kid: String,
    pub n: String,
    pub e: String,
}

impl Jwk {
    /// # Errors
    /// Returns an error if the modulus or exponent cannot be decoded.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, JwksError> {
        let n_bytes = Base64UrlUnpadded::decode_vec(&self.n).map_err(|_| JwksError::Base64)?;
        let e_bytes = Base64UrlUnpadded::decode_vec(&self.e).map_err(|_| JwksError::Base64)?;
        let n = BigUint::from_bytes_be(&n_bytes);
        let e = BigUint::from_bytes_be(&e_bytes);
        Ok(RsaPublicKey::new(n, e)?)
    }

    /// Check an RS256 signature over `signing_input`.
    #[must_use]
    pub fn verify_rs256(&self, signing_input: &[u8], signature: &[u8]) -> bool {
        if self.kty != "RSA" || self.alg.as_deref().is_some_and(|alg| alg != "RS256") {
            return false;
        }
        let Ok(public_key) = self.to_rsa_public_key() else {
            return false;
        };
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(public_key)
            .verify(signing_input, &signature)
            .is_ok()
    }
}
