//! HTTP error taxonomy shared by every handler.
//!
//! Bodies are always `{"message": ..}` JSON, with extra fields only where a
//! client needs them to react (`requiresRecentAuth`, rate counters, `field`).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use tracing::{error, warn};

use super::handlers::guard::RateLimitStatus;
use crate::{
    accounts::AccountError,
    auth::{PasswordError, RecencyFailure, TokenError},
    ratelimit::{RateDecision, StoreError},
    sso::Rejection,
};

pub const MISSING_TOKEN: &str = "Missing authorization token.";
pub const INVALID_TOKEN: &str = "Invalid or expired token.";
pub const STALE_TOKEN: &str = "Token is too old. Please verify your identity again.";
pub const RATE_LIMITED: &str = "Rate limit exceed for that endpoint";
pub const FEDERATED_FAILED: &str = "Invalid or expired SSO token";
const INTERNAL: &str = "Internal server error";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or broken server-side configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("missing authorization token")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    /// Rejected credentials other than a bearer token.
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{message}")]
    RecentAuthRequired {
        failure: RecencyFailure,
        message: String,
    },
    #[error("rate limit exceeded ({}/{})", .0.count, .0.limit)]
    RateLimited(RateDecision),
    /// Federated rejection; the reason is logged, never returned.
    #[error("federated verification failed: {0}")]
    FederatedVerification(Rejection),
    #[error("{message}")]
    BadRequest {
        message: String,
        field: Option<&'static str>,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            field: None,
        }
    }

    pub fn bad_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            field: Some(field),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Configuration(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingToken | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidToken | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RecentAuthRequired { failure, .. } => match failure {
                RecencyFailure::Invalid => StatusCode::UNAUTHORIZED,
                RecencyFailure::Missing
                | RecencyFailure::Stale
                | RecencyFailure::InsufficientScope => StatusCode::FORBIDDEN,
            },
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::FederatedVerification(rejection) => match rejection {
                Rejection::UnsupportedProvider(_) => StatusCode::BAD_REQUEST,
                Rejection::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::UNAUTHORIZED,
            },
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
        }
    }
}

fn message_body(message: &str) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("message".to_string(), Value::from(message));
    body
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Configuration(detail) => {
                error!("Configuration error: {detail}");
                message_body(INTERNAL)
            }
            Self::Internal(detail) => {
                error!("Internal error: {detail}");
                message_body(INTERNAL)
            }
            Self::MissingToken => message_body(MISSING_TOKEN),
            Self::InvalidToken => message_body(INVALID_TOKEN),
            Self::Unauthorized(message)
            | Self::Forbidden(message)
            | Self::NotFound(message)
            | Self::Conflict(message) => message_body(&message),
            Self::RecentAuthRequired { failure, message } => {
                let mut body = message_body(&message);
                body.insert("requiresRecentAuth".to_string(), Value::Bool(true));
                if failure == RecencyFailure::Stale {
                    body.insert("field".to_string(), Value::from("recentAuth"));
                }
                body
            }
            Self::RateLimited(decision) => {
                let body = json!({
                    "message": RATE_LIMITED,
                    "requestCount": decision.count,
                    "ratelimitCount": decision.limit,
                });
                return (status, RateLimitStatus(decision), Json(body)).into_response();
            }
            Self::FederatedVerification(rejection) => {
                warn!("Federated identity rejected: {rejection}");
                match rejection {
                    Rejection::UnsupportedProvider(_) => message_body("Unsupported SSO provider"),
                    Rejection::Configuration => message_body(INTERNAL),
                    _ => message_body(FEDERATED_FAILED),
                }
            }
            Self::BadRequest { message, field } => {
                let mut body = message_body(&message);
                if let Some(field) = field {
                    body.insert("field".to_string(), Value::from(field));
                }
                body
            }
        };
        (status, Json(Value::Object(body))).into_response()
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encode => Self::Internal(err.to_string()),
            TokenError::Malformed | TokenError::InvalidSignature | TokenError::Expired => {
                Self::InvalidToken
            }
        }
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        Self::FederatedVerification(rejection)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NotFound => Self::NotFound("User not found".to_string()),
            AccountError::EmailTaken => Self::bad_field("email", "Email already in use"),
            AccountError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::{body::to_bytes, http::HeaderValue};

    async fn body(error: ApiError) -> Result<(StatusCode, Value)> {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, serde_json::from_slice(&bytes)?))
    }

    #[tokio::test]
    async fn token_failures() -> Result<()> {
        let (status, json) = body(ApiError::MissingToken).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["message"], MISSING_TOKEN);

        let (status, json) = body(TokenError::Expired.into()).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["message"], INVALID_TOKEN);

        // Signature and expiry failures are indistinguishable.
        let (_, sig) = body(TokenError::InvalidSignature.into()).await?;
        assert_eq!(sig, json);
        Ok(())
    }

    #[tokio::test]
    async fn recency_failures_carry_flag() -> Result<()> {
        let (status, json) = body(ApiError::RecentAuthRequired {
            failure: RecencyFailure::Stale,
            message: STALE_TOKEN.to_string(),
        })
        .await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["requiresRecentAuth"], true);
        assert_eq!(json["field"], "recentAuth");

        let (status, json) = body(ApiError::RecentAuthRequired {
            failure: RecencyFailure::Invalid,
            message: INVALID_TOKEN.to_string(),
        })
        .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["requiresRecentAuth"], true);
        assert!(json.get("field").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn federated_rejections_are_opaque() -> Result<()> {
        let (status_a, json_a) = body(Rejection::Audience("x".to_string()).into()).await?;
        let (status_b, json_b) = body(Rejection::TooOld.into()).await?;
        assert_eq!(status_a, StatusCode::UNAUTHORIZED);
        assert_eq!(status_a, status_b);
        assert_eq!(json_a, json_b);
        assert_eq!(json_a["message"], FEDERATED_FAILED);

        let (status, _) = body(Rejection::Configuration.into()).await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        Ok(())
    }

    #[tokio::test]
    async fn rate_limited_sets_headers() -> Result<()> {
        let response = ApiError::RateLimited(RateDecision {
            allowed: false,
            count: 11,
            limit: 10,
            remaining: 0,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("x-ratelimit-limit"),
            Some(&HeaderValue::from_static("10"))
        );
        assert_eq!(
            response.headers().get("x-ratelimit-remaining"),
            Some(&HeaderValue::from_static("0"))
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let json: Value = serde_json::from_slice(&bytes)?;
        assert_eq!(json["requestCount"], 11);
        assert_eq!(json["ratelimitCount"], 10);
        Ok(())
    }

    #[tokio::test]
    async fn internal_details_are_hidden() -> Result<()> {
        let (status, json) = body(ApiError::Internal("redis down".to_string())).await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["message"], INTERNAL);
        Ok(())
    }
}
