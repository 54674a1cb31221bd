//! Local credentials, session tokens and capability checks.

pub mod password;
pub mod recency;
pub mod scope;
pub mod token;

pub use password::{PasswordError, PasswordHasher};
pub use recency::{RecencyFailure, RecencyGate};
pub use scope::{Action, Context, Scope, ScopeParseError, authorize};
pub use token::{
    Identity, Role, SessionClaims, SessionCodec, Subject, TokenError, TokenKind, TokenSettings,
    is_recent,
};
