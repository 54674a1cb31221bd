//! Step-up check for sensitive operations.
//!
//! A token is `fresh` when it was issued at most `max_age_minutes` ago. The
//! state is recomputed from `iat` on every request; nothing is persisted.

use chrono::Utc;
use tracing::debug;

use super::{
    scope::{Scope, authorize},
    token::{SessionClaims, SessionCodec, is_recent_at},
};

/// Why the recency gate refused a request.
///
/// Every variant maps to a response carrying `requiresRecentAuth: true` so
/// the client can prompt for re-verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecencyFailure {
    #[error("missing authorization token")]
    Missing,
    #[error("invalid or expired token")]
    Invalid,
    #[error("token is too old")]
    Stale,
    #[error("insufficient permissions")]
    InsufficientScope,
}

#[derive(Debug, Clone)]
pub struct RecencyGate {
    max_age_minutes: u32,
    required: Vec<Scope>,
}

impl RecencyGate {
    #[must_use]
    pub fn new(max_age_minutes: u32, required: Vec<Scope>) -> Self {
        Self {
            max_age_minutes,
            required,
        }
    }

    /// Run the gate against the current clock.
    ///
    /// # Errors
    /// Returns the first failing step.
    pub fn check(
        &self,
        codec: &SessionCodec,
        bearer: Option<&str>,
    ) -> Result<SessionClaims, RecencyFailure> {
        self.check_at(codec, bearer, Utc::now().timestamp())
    }

    /// Run the gate against `now` (unix seconds).
    ///
    /// # Errors
    /// Returns the first failing step.
    pub fn check_at(
        &self,
        codec: &SessionCodec,
        bearer: Option<&str>,
        now: i64,
    ) -> Result<SessionClaims, RecencyFailure> {
        let token = bearer.ok_or(RecencyFailure::Missing)?;
        let claims = codec.verify_at(token, now).map_err(|err| {
            debug!("recency gate token rejected: {err}");
            RecencyFailure::Invalid
        })?;

        if !is_recent_at(&claims, self.max_age_minutes, now) {
            return Err(RecencyFailure::Stale);
        }

        if !authorize(&claims.user.scopes, &self.required) {
            return Err(RecencyFailure::InsufficientScope);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        scope::Action,
        token::{Identity, Role, TokenSettings},
    };
    use anyhow::Result;
    use secrecy::SecretString;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    fn codec() -> SessionCodec {
        SessionCodec::new(&TokenSettings {
            secret: SecretString::from("s".repeat(48)),
            ttl: Duration::from_secs(7 * 24 * 3600),
            issuer: "auth-api".to_string(),
        })
    }

    fn token(codec: &SessionCodec, role: Role, iat: i64) -> Result<String> {
        Ok(codec.issue_at(
            &Identity {
                id: "isabelle".to_string(),
                email: "isabelle@town.hall".to_string(),
                name: "Isabelle".to_string(),
            },
            role,
            iat,
        )?)
    }

    #[test]
    fn fresh_token_with_scope_passes() -> Result<()> {
        let codec = codec();
        let gate = RecencyGate::new(10, vec![Scope::own("sso", Action::Write)]);
        let token = token(&codec, Role::User, NOW)?;
        let claims = gate.check_at(&codec, Some(&token), NOW + 9 * 60)?;
        assert_eq!(claims.user.id, "isabelle");
        Ok(())
    }

    #[test]
    fn missing_token() {
        let gate = RecencyGate::new(10, Vec::new());
        assert_eq!(
            gate.check_at(&codec(), None, NOW).err(),
            Some(RecencyFailure::Missing)
        );
    }

    #[test]
    fn invalid_token() {
        let gate = RecencyGate::new(10, Vec::new());
        assert_eq!(
            gate.check_at(&codec(), Some("not.a.token"), NOW).err(),
            Some(RecencyFailure::Invalid)
        );
    }

    #[test]
    fn stale_token_is_refused_before_expiry() -> Result<()> {
        let codec = codec();
        let gate = RecencyGate::new(10, Vec::new());
        let token = token(&codec, Role::User, NOW)?;
        assert_eq!(
            gate.check_at(&codec, Some(&token), NOW + 11 * 60).err(),
            Some(RecencyFailure::Stale)
        );
        Ok(())
    }

    #[test]
    fn fresh_token_without_scope() -> Result<()> {
        let codec = codec();
        let gate = RecencyGate::new(10, vec![Scope::own("sso", Action::Write)]);
        let token = token(&codec, Role::Admin, NOW)?;
        assert_eq!(
            gate.check_at(&codec, Some(&token), NOW).err(),
            Some(RecencyFailure::InsufficientScope)
        );
        Ok(())
    }
}
