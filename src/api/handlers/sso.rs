//! Federated sign-in routes.
//!
//! Flow Overview:
//! 1) `GET /sso/{provider}` hands the client a provider authorize URL.
//! 2) `POST /sso/{provider}` verifies the returned assertion, then signs in
//!    the linked account or creates one. An email already owned by another
//!    sign-in method is a conflict, never an implicit merge.
//! 3) `link` / `unlink` attach or detach a provider on the current account
//!    behind the recency gate. The last sign-in method cannot be removed.

use axum::{
    extract::{Extension, Json, Path, Query, rejection::JsonRejection, rejection::QueryRejection},
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use super::{
    auth::{SessionResponse, TOKEN_TYPE_USER},
    guard::{CallerKey, rate_limit, require_recent_auth},
    json_rejection, query_rejection,
};
use crate::{
    accounts::{AccountView, DEFAULT_DISPLAY_NAME, LinkedProvider, NewAccount},
    api::{error::ApiError, state::AppState},
    auth::{Action, RecencyGate, Role, Scope},
    sso::{Platform, Provider, VerifiedIdentity},
};

const LOGIN_URL_LIMIT: u64 = 20;
const SIGN_IN_LIMIT: u64 = 10;
const LINK_LIMIT: u64 = 5;
const LINK_MAX_AGE_MINUTES: u32 = 10;

static LINK_GATE: LazyLock<RecencyGate> = LazyLock::new(|| {
    RecencyGate::new(LINK_MAX_AGE_MINUTES, vec![Scope::own("sso", Action::Write)])
});

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginUrlQuery {
    /// Where the provider posts the authorization response.
    redirect_uri: Option<String>,
    /// Opaque value echoed back by the provider; generated when absent.
    state: Option<String>,
    /// `ios` selects the iOS client id.
    platform: Option<Platform>,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginUrlResponse {
    pub provider: Provider,
    pub platform: Platform,
    pub login_url: String,
    pub state: String,
    pub client_id: String,
    pub redirect_uri: String,
}

#[derive(ToSchema, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    /// Identity assertion returned by the provider.
    token: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(ToSchema, Deserialize)]
pub struct LinkRequest {
    token: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub(crate) fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

fn parse_provider(provider: &str) -> Result<Provider, ApiError> {
    provider.parse::<Provider>().map_err(ApiError::from)
}

fn required_token(token: &str) -> Result<&str, ApiError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::bad_field("token", "SSO token is required"));
    }
    Ok(token)
}

/// Prefer the client-supplied name, then the provider's, then the default.
fn display_name(request: &SignInRequest, identity: &VerifiedIdentity) -> String {
    let non_empty = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let from_parts = {
        let parts: Vec<String> = [&request.first_name, &request.last_name]
            .into_iter()
            .filter_map(non_empty)
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    };

    non_empty(&request.name)
        .or(from_parts)
        .or_else(|| non_empty(&identity.name))
        .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string())
}

#[utoipa::path(
    get,
    path = "/sso/{provider}",
    params(
        ("provider" = String, Path, description = "Identity provider, `apple`"),
        LoginUrlQuery,
    ),
    responses(
        (status = 200, description = "Provider authorize URL", body = LoginUrlResponse),
        (status = 400, description = "Unsupported provider or missing redirect_uri"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    tag = "sso"
)]
pub async fn login_url(
    Extension(state): Extension<Arc<AppState>>,
    caller: CallerKey,
    uri: Uri,
    Path(provider): Path<String>,
    query: Result<Query<LoginUrlQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let rate = rate_limit(&state, &caller, uri.path(), LOGIN_URL_LIMIT).await?;
    Ok((rate, build_login_url(&state, &provider, query)).into_response())
}

fn build_login_url(
    state: &AppState,
    provider: &str,
    query: Result<Query<LoginUrlQuery>, QueryRejection>,
) -> Result<Json<LoginUrlResponse>, ApiError> {
    let provider = parse_provider(provider)?;
    let Query(query) = query.map_err(|e| query_rejection(&e))?;
    let redirect_uri = query
        .redirect_uri
        .filter(|uri| !uri.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("redirect_uri query parameter is required"))?;
    let platform = query.platform.unwrap_or_default();

    let login = state.sso.login_url(
        provider.as_str(),
        &redirect_uri,
        query.state.as_deref(),
        platform,
    )?;

    Ok(Json(LoginUrlResponse {
        provider,
        platform,
        login_url: login.url,
        state: login.state,
        client_id: login.client_id,
        redirect_uri,
    }))
}

#[utoipa::path(
    post,
    path = "/sso/{provider}",
    params(("provider" = String, Path, description = "Identity provider, `apple`")),
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in with the provider", body = SessionResponse),
        (status = 400, description = "Unsupported provider or invalid input"),
        (status = 401, description = "Assertion rejected"),
        (status = 409, description = "Email registered with another sign-in method"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    tag = "sso"
)]
pub async fn sign_in(
    Extension(state): Extension<Arc<AppState>>,
    caller: CallerKey,
    uri: Uri,
    Path(provider): Path<String>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let rate = rate_limit(&state, &caller, uri.path(), SIGN_IN_LIMIT).await?;
    Ok((rate, federated_sign_in(&state, &provider, payload).await).into_response())
}

async fn federated_sign_in(
    state: &AppState,
    provider: &str,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let provider = parse_provider(provider)?;
    let Json(request) = payload.map_err(|e| json_rejection(&e))?;
    let identity = state
        .sso
        .verify(provider.as_str(), required_token(&request.token)?)?;

    let now = Utc::now();
    let account = if let Some(mut account) = state
        .accounts
        .find_by_provider(provider, &identity.provider_id)
        .await?
    {
        if let Some(link) = account
            .sso_providers
            .iter_mut()
            .find(|p| p.provider == provider && p.provider_id == identity.provider_id)
        {
            link.last_login = now;
        }
        state.accounts.update(account).await?
    } else {
        let Some(email) = identity.email.clone().filter(|e| !e.is_empty()) else {
            return Err(ApiError::bad_field(
                "email",
                "Identity provider did not share an email address",
            ));
        };
        if state.accounts.find_by_email(&email).await?.is_some() {
            return Err(ApiError::Conflict(
                "User already registered with other sign in method".to_string(),
            ));
        }

        let created = state
            .accounts
            .create(NewAccount {
                name: display_name(&request, &identity),
                email,
                password_hash: None,
                role: Role::User,
                sso_providers: vec![LinkedProvider {
                    provider,
                    provider_id: identity.provider_id.clone(),
                    connected_at: now,
                    last_login: now,
                }],
            })
            .await?;
        info!("Created account {} from {provider} sign-in", created.id);
        created
    };

    let token = state.codec.issue(&account.identity(), account.role)?;
    Ok(Json(SessionResponse {
        message: "SSO authentication successful".to_string(),
        user: AccountView::from(&account),
        token,
        token_type: TOKEN_TYPE_USER.to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/sso/{provider}/link",
    params(("provider" = String, Path, description = "Identity provider, `apple`")),
    request_body = LinkRequest,
    responses(
        (status = 200, description = "Provider linked", body = MessageResponse),
        (status = 400, description = "Already linked or invalid input"),
        (status = 401, description = "Invalid token or assertion rejected"),
        (status = 403, description = "Recent authentication required"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    security(("bearer" = [])),
    tag = "sso"
)]
pub async fn link(
    Extension(state): Extension<Arc<AppState>>,
    caller: CallerKey,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(provider): Path<String>,
    payload: Result<Json<LinkRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let rate = rate_limit(&state, &caller, uri.path(), LINK_LIMIT).await?;
    let result = link_provider(&state, &headers, &method, &uri, &provider, payload).await;
    Ok((rate, result).into_response())
}

async fn link_provider(
    state: &AppState,
    headers: &HeaderMap,
    method: &Method,
    uri: &Uri,
    provider: &str,
    payload: Result<Json<LinkRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let claims = require_recent_auth(state, headers, &LINK_GATE, method, uri)?;
    let account_id = claims.user.id.as_str();
    let provider = parse_provider(provider)?;
    let Json(request) = payload.map_err(|e| json_rejection(&e))?;
    let identity = state
        .sso
        .verify(provider.as_str(), required_token(&request.token)?)?;

    let mut account = state
        .accounts
        .find_by_id(account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if account.linked(provider).is_some() {
        return Err(ApiError::bad_request(
            "SSO provider already linked to this account",
        ));
    }
    if let Some(owner) = state
        .accounts
        .find_by_provider(provider, &identity.provider_id)
        .await?
        && owner.id != account.id
    {
        warn!(
            "Refused to link {provider} identity owned by {} to {}",
            owner.id, account.id
        );
        return Err(ApiError::bad_request(
            "This SSO account is already linked to another user",
        ));
    }

    let now = Utc::now();
    account.sso_providers.push(LinkedProvider {
        provider,
        provider_id: identity.provider_id,
        connected_at: now,
        last_login: now,
    });
    state.accounts.update(account).await?;
    info!("Linked {provider} to account {account_id}");

    Ok(MessageResponse::new("SSO provider linked successfully"))
}

#[utoipa::path(
    delete,
    path = "/sso/{provider}/unlink",
    params(("provider" = String, Path, description = "Identity provider, `apple`")),
    responses(
        (status = 200, description = "Provider unlinked", body = MessageResponse),
        (status = 400, description = "Not linked or last sign-in method"),
        (status = 401, description = "Invalid token"),
        (status = 403, description = "Recent authentication required"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    security(("bearer" = [])),
    tag = "sso"
)]
pub async fn unlink(
    Extension(state): Extension<Arc<AppState>>,
    caller: CallerKey,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> Result<Response, ApiError> {
    let rate = rate_limit(&state, &caller, uri.path(), LINK_LIMIT).await?;
    let result = unlink_provider(&state, &headers, &method, &uri, &provider).await;
    Ok((rate, result).into_response())
}

async fn unlink_provider(
    state: &AppState,
    headers: &HeaderMap,
    method: &Method,
    uri: &Uri,
    provider: &str,
) -> Result<Json<MessageResponse>, ApiError> {
    let claims = require_recent_auth(state, headers, &LINK_GATE, method, uri)?;
    let account_id = claims.user.id.as_str();
    let provider = parse_provider(provider)?;
    let mut account = state
        .accounts
        .find_by_id(account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if account.linked(provider).is_none() {
        return Err(ApiError::bad_request("SSO provider not linked to this account"));
    }
    if !account.has_password() && account.sso_providers.len() == 1 {
        return Err(ApiError::bad_request(
            "Cannot unlink last authentication method. Set a password first.",
        ));
    }

    account.sso_providers.retain(|p| p.provider != provider);
    state.accounts.update(account).await?;
    info!("Unlinked {provider} from account {account_id}");

    Ok(MessageResponse::new("SSO provider unlinked successfully"))
}
