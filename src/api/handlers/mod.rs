//! Route handlers and shared input checks.
//!
//! Every handler follows the same order: rate limit, then authentication or
//! the recency gate, then input validation, then the operation itself.

pub mod auth;
pub mod guard;
pub mod health;
pub mod sso;
pub mod users;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use regex::Regex;

use super::error::ApiError;

pub const NAME_MAX_CHARS: usize = 100;
pub const PASSWORD_MIN_CHARS: usize = 6;
pub const PASSWORD_MAX_CHARS: usize = 50;

/// Lightweight email sanity check used before persisting data.
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Length check on characters, not bytes.
pub(crate) fn check_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len < min {
        return Err(ApiError::bad_field(
            field,
            format!("{field} must be at least {min} characters"),
        ));
    }
    if len > max {
        return Err(ApiError::bad_field(
            field,
            format!("{field} must be at most {max} characters"),
        ));
    }
    Ok(())
}

/// Body extraction failures surface as our own 400 once the rate limiter has run.
pub(crate) fn json_rejection(rejection: &JsonRejection) -> ApiError {
    ApiError::bad_request(rejection.body_text())
}

pub(crate) fn query_rejection(rejection: &QueryRejection) -> ApiError {
    ApiError::bad_request(rejection.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("tom.nook@nook.inc"));
        assert!(valid_email("k.k@slider.fm"));
    }

    #[test]
    fn valid_email_rejects_garbage() {
        assert!(!valid_email("tom nook@nook.inc"));
        assert!(!valid_email("tom@nook"));
        assert!(!valid_email("@nook.inc"));
        assert!(!valid_email(""));
    }

    #[test]
    fn length_counts_characters() {
        assert!(check_length("name", "Zé", 2, 100).is_ok());
        assert!(check_length("name", "Z", 2, 100).is_err());
        assert!(check_length("password", &"x".repeat(51), 6, 50).is_err());
        assert!(check_length("password", &"x".repeat(50), 6, 50).is_ok());
    }
}
