//! Local credential routes: register, login, service tokens and `/auth/me`.

use axum::{
    extract::{Extension, Json, rejection::JsonRejection},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{
    NAME_MAX_CHARS, PASSWORD_MAX_CHARS, PASSWORD_MIN_CHARS, check_length,
    guard::{CallerKey, authenticate, rate_limit},
    json_rejection, valid_email,
};
use crate::{
    accounts::{AccountError, AccountView, NewAccount, normalize_email},
    api::{error::ApiError, state::AppState},
    auth::{Action, Role, Scope, TokenKind},
};

const REGISTER_LIMIT: u64 = 5;
const LOGIN_LIMIT: u64 = 10;
const SYSTEM_LIMIT: u64 = 5;
const ME_LIMIT: u64 = 30;
const NAME_MIN_CHARS: usize = 2;
const BAD_CREDENTIALS: &str = "Invalid username or password";
pub(crate) const TOKEN_TYPE_USER: &str = "user";

#[derive(ToSchema, Deserialize)]
pub struct RegisterRequest {
    name: String,
    email: String,
    #[serde(default)]
    password: Option<String>,
}

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(ToSchema, Deserialize)]
pub struct SystemRequest {
    key: String,
}

/// Account plus a freshly issued principal token.
#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub message: String,
    pub user: AccountView,
    pub token: String,
    pub token_type: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct SystemTokenResponse {
    pub message: String,
    pub token: String,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    #[serde(rename = "type")]
    #[schema(value_type = String)]
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issuer: String,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: AccountView,
    pub token_info: TokenInfo,
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = SessionResponse),
        (status = 400, description = "Invalid input or existing account"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    tag = "auth"
)]
pub async fn register(
    Extension(state): Extension<Arc<AppState>>,
    caller: CallerKey,
    uri: Uri,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let rate = rate_limit(&state, &caller, uri.path(), REGISTER_LIMIT).await?;
    Ok((rate, register_account(&state, payload).await).into_response())
}

async fn register_account(
    state: &AppState,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|e| json_rejection(&e))?;

    let name = request.name.trim().to_string();
    check_length("name", &name, NAME_MIN_CHARS, NAME_MAX_CHARS)?;
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::bad_field("email", "Invalid email address"));
    }
    if let Some(password) = &request.password {
        check_length("password", password, PASSWORD_MIN_CHARS, PASSWORD_MAX_CHARS)?;
    }

    if state.accounts.find_by_email(&email).await?.is_some() {
        return Err(ApiError::bad_request("User already exists"));
    }

    let password_hash = match request.password {
        Some(password) => {
            let hasher = state.hasher.clone();
            Some(tokio::task::spawn_blocking(move || hasher.hash(&password)).await??)
        }
        None => None,
    };

    let account = state
        .accounts
        .create(NewAccount {
            name,
            email,
            password_hash,
            role: Role::User,
            sso_providers: Vec::new(),
        })
        .await
        .map_err(|err| match err {
            AccountError::EmailTaken => ApiError::bad_request("User already exists"),
            other => other.into(),
        })?;

    let token = state.codec.issue(&account.identity(), account.role)?;
    info!("Registered account {}", account.id);

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            message: "User registered successfully".to_string(),
            user: AccountView::from(&account),
            token,
            token_type: TOKEN_TYPE_USER.to_string(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = SessionResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    caller: CallerKey,
    uri: Uri,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let rate = rate_limit(&state, &caller, uri.path(), LOGIN_LIMIT).await?;
    Ok((rate, login_account(&state, payload).await).into_response())
}

async fn login_account(
    state: &AppState,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| json_rejection(&e))?;

    let account = state.accounts.find_by_email(&request.email).await?;
    let Some((account, digest)) =
        account.and_then(|a| a.password_hash.clone().filter(|d| !d.is_empty()).map(|d| (a, d)))
    else {
        return Err(ApiError::Unauthorized(BAD_CREDENTIALS.to_string()));
    };

    let hasher = state.hasher.clone();
    let password = request.password;
    let matches = tokio::task::spawn_blocking(move || hasher.verify(&password, &digest)).await?;
    if !matches {
        return Err(ApiError::Unauthorized(BAD_CREDENTIALS.to_string()));
    }

    let token = state.codec.issue(&account.identity(), account.role)?;
    Ok(Json(SessionResponse {
        message: "User logged in".to_string(),
        user: AccountView::from(&account),
        token,
        token_type: TOKEN_TYPE_USER.to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/auth/system",
    request_body = SystemRequest,
    responses(
        (status = 200, description = "Service token issued", body = SystemTokenResponse),
        (status = 401, description = "Invalid system key"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    tag = "auth"
)]
pub async fn system(
    Extension(state): Extension<Arc<AppState>>,
    caller: CallerKey,
    uri: Uri,
    payload: Result<Json<SystemRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let rate = rate_limit(&state, &caller, uri.path(), SYSTEM_LIMIT).await?;
    Ok((rate, system_token(&state, &caller, payload)).into_response())
}

fn system_token(
    state: &AppState,
    caller: &CallerKey,
    payload: Result<Json<SystemRequest>, JsonRejection>,
) -> Result<Json<SystemTokenResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| json_rejection(&e))?;
    if !state.system_key_matches(&request.key) {
        warn!("Rejected system key from {}", caller.0);
        return Err(ApiError::Unauthorized("Invalid system key".to_string()));
    }

    let token = state.codec.issue_service_token()?;
    Ok(Json(SystemTokenResponse {
        message: "System token generated successfully".to_string(),
        token,
    }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current account and token details", body = MeResponse),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Missing token or insufficient permissions"),
        (status = 429, description = "Rate limit exceeded"),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(
    Extension(state): Extension<Arc<AppState>>,
    caller: CallerKey,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let rate = rate_limit(&state, &caller, uri.path(), ME_LIMIT).await?;
    Ok((rate, current_account(&state, &headers, &method, &uri).await).into_response())
}

async fn current_account(
    state: &AppState,
    headers: &HeaderMap,
    method: &Method,
    uri: &Uri,
) -> Result<Json<MeResponse>, ApiError> {
    let claims = authenticate(
        state,
        headers,
        method,
        uri,
        &[Scope::own("user", Action::Read)],
    )?;

    let account = state
        .accounts
        .find_by_id(&claims.user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(MeResponse {
        user: AccountView::from(&account),
        token_info: TokenInfo {
            kind: claims.kind,
            issued_at: DateTime::from_timestamp(claims.iat, 0).unwrap_or_default(),
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_default(),
            issuer: claims.iss,
        },
    }))
}
