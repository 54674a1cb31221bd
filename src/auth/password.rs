//! Password hashing for locally managed credentials.
//!
//! Digests are Argon2id PHC strings with a fresh random salt per call, so two
//! hashes of the same password never compare equal by value. Only the digest
//! is ever stored; the plaintext is dropped as soon as hashing returns.

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::rngs::OsRng;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("failed to hash password")]
    Hash,
}

#[derive(Clone, Debug)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default()),
        }
    }

    /// Hash a password into a self-describing PHC string.
    ///
    /// # Errors
    /// Returns `PasswordError::Hash` if Argon2 rejects the input or parameters.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| PasswordError::Hash)
    }

    /// Compare a password against a stored digest.
    ///
    /// Unparseable digests are treated as a mismatch.
    #[must_use]
    pub fn verify(&self, password: &str, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            debug!("stored password digest is not a valid PHC string");
            return false;
        };
        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::PasswordHasher;
    use anyhow::Result;

    #[test]
    fn hash_and_verify_round_trip() -> Result<()> {
        let hasher = PasswordHasher::new();
        let digest = hasher.hash("correct horse")?;
        assert!(digest.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &digest));
        assert!(!hasher.verify("wrong horse", &digest));
        Ok(())
    }

    #[test]
    fn same_password_hashes_differ() -> Result<()> {
        let hasher = PasswordHasher::new();
        let first = hasher.hash("hunter22")?;
        let second = hasher.hash("hunter22")?;
        assert_ne!(first, second);
        assert!(hasher.verify("hunter22", &first));
        assert!(hasher.verify("hunter22", &second));
        Ok(())
    }

    #[test]
    fn mutated_digest_fails_closed() -> Result<()> {
        let hasher = PasswordHasher::new();
        let digest = hasher.hash("hunter22")?;

        // Swap one character inside the encoded hash segment.
        let idx = digest.len() - 5;
        let replacement = if digest.as_bytes()[idx] == b'A' { "B" } else { "A" };
        let mut mutated = digest.clone();
        mutated.replace_range(idx..=idx, replacement);
        assert_ne!(mutated, digest);
        assert!(!hasher.verify("hunter22", &mutated));

        assert!(!hasher.verify("hunter22", "not-a-phc-string"));
        assert!(!hasher.verify("hunter22", ""));
        Ok(())
    }
}
