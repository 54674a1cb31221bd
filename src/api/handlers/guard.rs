//! Per-request checks shared by the route handlers.
//!
//! Flow Overview:
//! 1) `rate_limit` counts the request for `(caller, route)` and fails closed on store errors.
//! 2) `authenticate` verifies the bearer token and checks the route's scopes (any-of).
//! 3) `require_recent_auth` runs the recency gate instead of (2) on sensitive routes.
//!
//! Handlers attach the returned `RateLimitStatus` to whatever they answer, so
//! the counter headers appear on allowed and denied responses alike.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, HeaderValue, Method, Uri, request::Parts},
    response::{IntoResponseParts, ResponseParts},
};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tracing::{debug, warn};

use crate::{
    api::{
        error::{ApiError, INVALID_TOKEN, MISSING_TOKEN, STALE_TOKEN},
        state::AppState,
    },
    auth::{RecencyFailure, RecencyGate, Scope, SessionClaims, authorize},
    ratelimit::RateDecision,
};

const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const UNKNOWN_CALLER: &str = "unknown";

/// Pull a bearer token out of the `Authorization` header.
#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Extract a client IP from common proxy headers.
#[must_use]
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Caller identity used in rate-limit keys.
///
/// Proxy headers are honored only when the server is configured to trust
/// them; otherwise the peer address is used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerKey(pub String);

impl<S> FromRequestParts<S> for CallerKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let trust_proxy = parts
            .extensions
            .get::<Arc<AppState>>()
            .is_some_and(|app| app.trust_proxy);

        if trust_proxy && let Some(ip) = extract_client_ip(&parts.headers) {
            return Ok(Self(ip));
        }

        let peer = ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(Self(peer.unwrap_or_else(|| UNKNOWN_CALLER.to_string())))
    }
}

/// Rate counters rendered as `X-RateLimit-*` response headers.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitStatus(pub RateDecision);

impl IntoResponseParts for RateLimitStatus {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        let headers = res.headers_mut();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.0.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.0.remaining));
        Ok(res)
    }
}

/// Count one request and refuse it once the route's limit is exceeded.
///
/// # Errors
/// `RateLimited` past the limit, `Internal` when the counter store is down.
pub async fn rate_limit(
    state: &AppState,
    caller: &CallerKey,
    route: &str,
    limit: u64,
) -> Result<RateLimitStatus, ApiError> {
    let decision = state
        .limiter
        .allow(&caller.0, route, limit)
        .await
        .map_err(|err| {
            warn!("Rate limit check failed for {route}: {err}");
            ApiError::from(err)
        })?;

    if decision.allowed {
        Ok(RateLimitStatus(decision))
    } else {
        debug!(
            "Rate limit exceeded for {} on {route}: {}/{}",
            caller.0, decision.count, decision.limit
        );
        Err(ApiError::RateLimited(decision))
    }
}

fn insufficient(claims: &SessionClaims, method: &Method, uri: &Uri) -> String {
    format!(
        "Insufficient permissions for user {} on {method} {}",
        claims.user.id,
        uri.path()
    )
}

/// Verify the bearer token and require any one of `required`.
///
/// # Errors
/// `MissingToken`, `InvalidToken` or `Forbidden`.
pub fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    method: &Method,
    uri: &Uri,
    required: &[Scope],
) -> Result<SessionClaims, ApiError> {
    let token = extract_bearer_token(headers).ok_or(ApiError::MissingToken)?;
    let claims = state.codec.verify(&token).map_err(|err| {
        debug!("Bearer token rejected: {err}");
        ApiError::from(err)
    })?;

    if !authorize(&claims.user.scopes, required) {
        return Err(ApiError::Forbidden(insufficient(&claims, method, uri)));
    }
    Ok(claims)
}

/// Run the recency gate for a sensitive operation.
///
/// # Errors
/// `RecentAuthRequired`, always carrying the re-verification flag.
pub fn require_recent_auth(
    state: &AppState,
    headers: &HeaderMap,
    gate: &RecencyGate,
    method: &Method,
    uri: &Uri,
) -> Result<SessionClaims, ApiError> {
    let bearer = extract_bearer_token(headers);
    match gate.check(&state.codec, bearer.as_deref()) {
        Ok(claims) => Ok(claims),
        Err(RecencyFailure::InsufficientScope) => {
            // Only reachable after a successful verify; decode again for the message.
            let message = bearer
                .as_deref()
                .and_then(|token| state.codec.verify(token).ok())
                .map_or_else(
                    || "Insufficient permissions".to_string(),
                    |claims| insufficient(&claims, method, uri),
                );
            Err(ApiError::RecentAuthRequired {
                failure: RecencyFailure::InsufficientScope,
                message,
            })
        }
        Err(failure) => {
            let message = match failure {
                RecencyFailure::Missing => MISSING_TOKEN,
                RecencyFailure::Stale => STALE_TOKEN,
                RecencyFailure::Invalid | RecencyFailure::InsufficientScope => INVALID_TOKEN,
            };
            Err(ApiError::RecentAuthRequired {
                failure,
                message: message.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accounts::MemoryAccountStore,
        auth::{Action, Identity, PasswordHasher, Role, SessionCodec, TokenSettings},
        ratelimit::{MemoryCounterStore, RateLimiter},
        sso::SsoVerifier,
    };
    use anyhow::Result;
    use axum::{http::Request, response::IntoResponse};
    use chrono::Utc;
    use secrecy::SecretString;
    use std::time::Duration;

    fn state(trust_proxy: bool) -> AppState {
        AppState {
            codec: SessionCodec::new(&TokenSettings {
                secret: SecretString::from("k".repeat(32)),
                ttl: Duration::from_secs(3600),
                issuer: "auth-api".to_string(),
            }),
            hasher: PasswordHasher::new(),
            limiter: RateLimiter::new(Arc::new(MemoryCounterStore::new()), Duration::from_secs(60)),
            sso: SsoVerifier::default(),
            accounts: Arc::new(MemoryAccountStore::new()),
            system_key: None,
            trust_proxy,
        }
    }

    fn identity() -> Identity {
        Identity {
            id: "isabelle".to_string(),
            email: "isabelle@town.hall".to_string(),
            name: "Isabelle".to_string(),
        }
    }

    fn bearer(token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(&format!("Bearer {token}"))?);
        Ok(headers)
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer  abc "));
        assert_eq!(extract_bearer_token(&headers), Some("abc".to_string()));

        headers.insert("authorization", HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer_token(&headers), Some("abc".to_string()));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 5.6.7.8"));
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));

        headers.remove("x-forwarded-for");
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));

        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }

    async fn caller_for(state: Arc<AppState>, peer: Option<SocketAddr>) -> Result<CallerKey> {
        let mut request = Request::builder()
            .uri("/auth/login")
            .header("x-forwarded-for", "10.0.0.7")
            .body(())?;
        request.extensions_mut().insert(state);
        if let Some(peer) = peer {
            request.extensions_mut().insert(ConnectInfo(peer));
        }
        let (mut parts, ()) = request.into_parts();
        let Ok(key) = CallerKey::from_request_parts(&mut parts, &()).await;
        Ok(key)
    }

    #[tokio::test]
    async fn caller_key_ignores_proxy_headers_unless_trusted() -> Result<()> {
        let peer: SocketAddr = "192.0.2.1:5555".parse()?;

        let untrusted = Arc::new(state(false));
        assert_eq!(caller_for(untrusted.clone(), Some(peer)).await?.0, "192.0.2.1");
        assert_eq!(caller_for(untrusted, None).await?.0, UNKNOWN_CALLER);

        let trusted = Arc::new(state(true));
        assert_eq!(caller_for(trusted, Some(peer)).await?.0, "10.0.0.7");
        Ok(())
    }

    #[tokio::test]
    async fn rate_limit_counts_per_route() -> Result<()> {
        let state = state(false);
        let caller = CallerKey("192.0.2.1".to_string());

        for _ in 0..2 {
            rate_limit(&state, &caller, "/auth/login", 2).await?;
        }
        let denied = rate_limit(&state, &caller, "/auth/login", 2).await;
        assert!(matches!(
            denied,
            Err(ApiError::RateLimited(RateDecision { count: 3, limit: 2, remaining: 0, .. }))
        ));

        let other = rate_limit(&state, &caller, "/auth/register", 2).await?;
        assert_eq!(other.0.remaining, 1);
        Ok(())
    }

    #[test]
    fn rate_status_headers() {
        let response = (
            RateLimitStatus(RateDecision {
                allowed: true,
                count: 3,
                limit: 10,
                remaining: 7,
            }),
            "ok",
        )
            .into_response();
        assert_eq!(
            response.headers().get(X_RATELIMIT_LIMIT),
            Some(&HeaderValue::from_static("10"))
        );
        assert_eq!(
            response.headers().get(X_RATELIMIT_REMAINING),
            Some(&HeaderValue::from_static("7"))
        );
    }

    #[test]
    fn authenticate_checks_token_then_scopes() -> Result<()> {
        let state = state(false);
        let uri: Uri = "/user".parse()?;
        let admin_only = [Scope::global("user", Action::Admin)];

        assert!(matches!(
            authenticate(&state, &HeaderMap::new(), &Method::GET, &uri, &admin_only),
            Err(ApiError::MissingToken)
        ));
        assert!(matches!(
            authenticate(&state, &bearer("nope")?, &Method::GET, &uri, &admin_only),
            Err(ApiError::InvalidToken)
        ));

        let user_token = state.codec.issue(&identity(), Role::User)?;
        match authenticate(&state, &bearer(&user_token)?, &Method::GET, &uri, &admin_only) {
            Err(ApiError::Forbidden(message)) => {
                assert_eq!(message, "Insufficient permissions for user isabelle on GET /user");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let admin_token = state.codec.issue(&identity(), Role::Admin)?;
        let claims = authenticate(&state, &bearer(&admin_token)?, &Method::GET, &uri, &admin_only)?;
        assert_eq!(claims.user.role, Role::Admin);
        Ok(())
    }

    #[test]
    fn recent_auth_failures_map_to_messages() -> Result<()> {
        let state = state(false);
        let uri: Uri = "/user/isabelle".parse()?;
        let gate = RecencyGate::new(10, vec![Scope::own("user", Action::Write)]);

        match require_recent_auth(&state, &HeaderMap::new(), &gate, &Method::PUT, &uri) {
            Err(ApiError::RecentAuthRequired { failure, message }) => {
                assert_eq!(failure, RecencyFailure::Missing);
                assert_eq!(message, MISSING_TOKEN);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let stale_at = Utc::now().timestamp() - 11 * 60;
        let stale = state.codec.issue_at(&identity(), Role::User, stale_at)?;
        match require_recent_auth(&state, &bearer(&stale)?, &gate, &Method::PUT, &uri) {
            Err(ApiError::RecentAuthRequired { failure, message }) => {
                assert_eq!(failure, RecencyFailure::Stale);
                assert_eq!(message, STALE_TOKEN);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let service = state.codec.issue_service_token()?;
        match require_recent_auth(&state, &bearer(&service)?, &gate, &Method::PUT, &uri) {
            Err(ApiError::RecentAuthRequired { failure, message }) => {
                assert_eq!(failure, RecencyFailure::InsufficientScope);
                assert_eq!(
                    message,
                    "Insufficient permissions for user system-token on PUT /user/isabelle"
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let fresh = state.codec.issue(&identity(), Role::User)?;
        let claims = require_recent_auth(&state, &bearer(&fresh)?, &gate, &Method::PUT, &uri)?;
        assert_eq!(claims.user.id, "isabelle");
        Ok(())
    }
}
