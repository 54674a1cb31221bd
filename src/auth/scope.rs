//! Capability scopes and the authorization check.
//!
//! A scope is `resource:action` (global) or `resource:own:action` (limited to
//! the caller's own records). Within one resource and context, `admin`
//! implies every action and `write` implies `read`. Global and `own` scopes
//! never satisfy each other.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Read,
    Write,
    Admin,
}

impl Action {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }

    /// Whether holding `self` grants `required` on the same resource and context.
    #[must_use]
    pub const fn implies(self, required: Self) -> bool {
        matches!(
            (self, required),
            (Self::Admin, _) | (Self::Write, Self::Write | Self::Read) | (Self::Read, Self::Read)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Context {
    Global,
    Own,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    resource: String,
    context: Context,
    action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeParseError {
    #[error("scope must be `resource:action` or `resource:own:action`: {0}")]
    Shape(String),
    #[error("unknown scope action `{0}`")]
    Action(String),
    #[error("scope resource must be non-empty lowercase ascii: {0}")]
    Resource(String),
}

impl Scope {
    #[must_use]
    pub fn global(resource: impl Into<String>, action: Action) -> Self {
        Self {
            resource: resource.into(),
            context: Context::Global,
            action,
        }
    }

    #[must_use]
    pub fn own(resource: impl Into<String>, action: Action) -> Self {
        Self {
            resource: resource.into(),
            context: Context::Own,
            action,
        }
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    #[must_use]
    pub const fn context(&self) -> Context {
        self.context
    }

    #[must_use]
    pub const fn action(&self) -> Action {
        self.action
    }

    /// Whether this granted scope satisfies `required`.
    #[must_use]
    pub fn satisfies(&self, required: &Self) -> bool {
        self.resource == required.resource
            && self.context == required.context
            && self.action.implies(required.action)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context {
            Context::Global => write!(f, "{}:{}", self.resource, self.action.as_str()),
            Context::Own => write!(f, "{}:own:{}", self.resource, self.action.as_str()),
        }
    }
}

impl FromStr for Action {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            other => Err(ScopeParseError::Action(other.to_string())),
        }
    }
}

impl FromStr for Scope {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (resource, context, action) = match parts.as_slice() {
            [resource, action] => (*resource, Context::Global, *action),
            [resource, "own", action] => (*resource, Context::Own, *action),
            _ => return Err(ScopeParseError::Shape(s.to_string())),
        };
        if resource.is_empty()
            || !resource
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
        {
            return Err(ScopeParseError::Resource(s.to_string()));
        }
        Ok(Self {
            resource: resource.to_string(),
            context,
            action: action.parse()?,
        })
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Decide whether `granted` satisfies ANY of `required`.
///
/// An empty `required` list always authorizes. Callers needing several
/// independent capabilities call this once per capability.
#[must_use]
pub fn authorize(granted: &[Scope], required: &[Scope]) -> bool {
    required.is_empty()
        || required
            .iter()
            .any(|needed| granted.iter().any(|held| held.satisfies(needed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn scopes(raw: &[&str]) -> Result<Vec<Scope>> {
        Ok(raw
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<Scope>, ScopeParseError>>()?)
    }

    #[test]
    fn parse_and_display_round_trip() -> Result<()> {
        for raw in ["user:read", "user:own:write", "villager:admin", "sso:own:read"] {
            let scope: Scope = raw.parse()?;
            assert_eq!(scope.to_string(), raw);
        }
        Ok(())
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(matches!(
            "user".parse::<Scope>(),
            Err(ScopeParseError::Shape(_))
        ));
        assert!(matches!(
            "user:mine:read".parse::<Scope>(),
            Err(ScopeParseError::Shape(_))
        ));
        assert!(matches!(
            "user:delete".parse::<Scope>(),
            Err(ScopeParseError::Action(_))
        ));
        assert!(matches!(
            ":read".parse::<Scope>(),
            Err(ScopeParseError::Resource(_))
        ));
        assert!(matches!(
            "User:read".parse::<Scope>(),
            Err(ScopeParseError::Resource(_))
        ));
    }

    #[test]
    fn admin_implies_read_and_write() -> Result<()> {
        assert!(authorize(&scopes(&["resource:admin"])?, &scopes(&["resource:read"])?));
        assert!(authorize(&scopes(&["resource:admin"])?, &scopes(&["resource:write"])?));
        Ok(())
    }

    #[test]
    fn write_implies_read_only() -> Result<()> {
        assert!(authorize(&scopes(&["resource:write"])?, &scopes(&["resource:read"])?));
        assert!(!authorize(&scopes(&["resource:read"])?, &scopes(&["resource:write"])?));
        assert!(!authorize(&scopes(&["resource:write"])?, &scopes(&["resource:admin"])?));
        Ok(())
    }

    #[test]
    fn empty_required_always_authorizes() -> Result<()> {
        assert!(authorize(&[], &[]));
        assert!(authorize(&scopes(&["user:read"])?, &[]));
        Ok(())
    }

    #[test]
    fn empty_granted_never_authorizes_a_requirement() -> Result<()> {
        assert!(!authorize(&[], &scopes(&["user:read"])?));
        Ok(())
    }

    #[test]
    fn any_required_scope_suffices() -> Result<()> {
        let granted = scopes(&["user:own:read"])?;
        assert!(authorize(&granted, &scopes(&["user:read", "user:own:read"])?));
        Ok(())
    }

    #[test]
    fn own_and_global_namespaces_are_disjoint() -> Result<()> {
        assert!(!authorize(&scopes(&["user:admin"])?, &scopes(&["user:own:read"])?));
        assert!(!authorize(&scopes(&["user:own:admin"])?, &scopes(&["user:read"])?));
        assert!(authorize(&scopes(&["user:own:write"])?, &scopes(&["user:own:read"])?));
        Ok(())
    }

    #[test]
    fn resources_do_not_leak() -> Result<()> {
        assert!(!authorize(&scopes(&["fish:admin"])?, &scopes(&["bug:read"])?));
        Ok(())
    }

    #[test]
    fn scopes_serialize_as_strings() -> Result<()> {
        let json = serde_json::to_string(&scopes(&["user:own:read", "bug:admin"])?)?;
        assert_eq!(json, r#"["user:own:read","bug:admin"]"#);
        let back: Vec<Scope> = serde_json::from_str(&json)?;
        assert_eq!(back, scopes(&["user:own:read", "bug:admin"])?);
        assert!(serde_json::from_str::<Vec<Scope>>(r#"["bogus"]"#).is_err());
        Ok(())
    }
}
