//! # Thibou (authentication and authorization core)
//!
//! `thibou` issues and checks the credentials the Thibou API runs on.
//!
//! ## Sessions
//!
//! Local passwords are stored as Argon2id digests. A successful sign-in
//! returns an HS256 session token whose claims carry the caller's identity,
//! role and fixed scope set. Verification is stateless: signature, then expiry.
//!
//! ## Authorization
//!
//! Scopes read `resource:action` or `resource:own:action`. A route lists the
//! scopes it accepts and the caller needs any one of them. `admin` implies
//! `write` implies `read`; own and global scopes never substitute for each other.
//! Sensitive routes also require a token issued within the last few minutes
//! (the recency gate) and answer with `requiresRecentAuth: true` when refused.
//!
//! ## Federated sign-in
//!
//! Sign in with Apple identity tokens are checked for issuer, audience,
//! expiry, age and subject, and optionally for their RS256 signature against
//! configured provider keys. Rejection reasons are logged, never returned.
//!
//! ## Rate limiting
//!
//! Every public route passes a fixed-window counter keyed by caller and
//! route, shared through Redis or kept in process. Store failures reject the
//! request.

pub mod accounts;
pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod ratelimit;
pub mod sso;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
