//! Account administration and self-service profile routes.

use axum::{
    extract::{Extension, Json, Path, rejection::JsonRejection},
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::info;
use utoipa::ToSchema;

use super::{
    NAME_MAX_CHARS, PASSWORD_MAX_CHARS, PASSWORD_MIN_CHARS, check_length,
    guard::{authenticate, require_recent_auth},
    json_rejection,
    sso::MessageResponse,
    valid_email,
};
use crate::{
    accounts::{AccountView, PublicAccountView, normalize_email},
    api::{error::ApiError, state::AppState},
    auth::{Action, RecencyGate, Role, Scope, authorize},
};

const PROFILE_MAX_AGE_MINUTES: u32 = 10;
const ACCESS_DENIED: &str = "Access denied";

static PROFILE_GATE: LazyLock<RecencyGate> = LazyLock::new(|| {
    RecencyGate::new(PROFILE_MAX_AGE_MINUTES, vec![Scope::own("user", Action::Write)])
});

fn user_admin() -> [Scope; 1] {
    [Scope::global("user", Action::Admin)]
}

#[derive(ToSchema, Serialize, Debug)]
pub struct UserListResponse {
    pub message: String,
    pub users: Vec<PublicAccountView>,
}

/// Either view, depending on who is asking.
#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum UserView {
    Full(AccountView),
    Public(PublicAccountView),
}

#[derive(ToSchema, Serialize, Debug)]
pub struct UserResponse {
    pub message: String,
    #[schema(value_type = AccountView)]
    pub user: UserView,
}

#[derive(ToSchema, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    new_password: Option<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct ProfileResponse {
    pub message: String,
    pub user: PublicAccountView,
}

#[utoipa::path(
    get,
    path = "/user",
    responses(
        (status = 200, description = "All accounts", body = UserListResponse),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Missing token or not an administrator"),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_users(
    Extension(state): Extension<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<UserListResponse>, ApiError> {
    authenticate(&state, &headers, &method, &uri, &user_admin())?;

    let users = state
        .accounts
        .list()
        .await?
        .iter()
        .map(PublicAccountView::from)
        .collect();

    Ok(Json(UserListResponse {
        message: "Users retrieved successfully".to_string(),
        users,
    }))
}

#[utoipa::path(
    get,
    path = "/user/{id}",
    params(("id" = String, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account; full view for administrators", body = UserResponse),
        (status = 403, description = "Access denied"),
        (status = 404, description = "User not found"),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_user(
    Extension(state): Extension<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let read_any = Scope::global("user", Action::Read);
    let claims = authenticate(
        &state,
        &headers,
        &method,
        &uri,
        &[read_any.clone(), Scope::own("user", Action::Read)],
    )?;

    let is_admin = claims.user.role == Role::Admin;
    let is_own = claims.user.id == id;
    if !(is_admin || is_own || authorize(&claims.user.scopes, &[read_any])) {
        return Err(ApiError::Forbidden(ACCESS_DENIED.to_string()));
    }

    let account = state
        .accounts
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let user = if is_admin {
        UserView::Full(AccountView::from(&account))
    } else {
        UserView::Public(PublicAccountView::from(&account))
    };

    Ok(Json(UserResponse {
        message: "User retrieved successfully".to_string(),
        user,
    }))
}

#[utoipa::path(
    put,
    path = "/user/{id}",
    params(("id" = String, Path, description = "Account id")),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = ProfileResponse),
        (status = 400, description = "Invalid input or email already in use"),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Recent authentication required or not the owner"),
        (status = 404, description = "User not found"),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn update_user(
    Extension(state): Extension<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let claims = require_recent_auth(&state, &headers, &PROFILE_GATE, &method, &uri)?;
    if claims.user.id != id {
        return Err(ApiError::Forbidden(ACCESS_DENIED.to_string()));
    }
    if claims.user.role == Role::System {
        return Err(ApiError::Forbidden(
            "System users cannot update profile".to_string(),
        ));
    }

    let Json(request) = payload.map_err(|e| json_rejection(&e))?;
    let mut account = state
        .accounts
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if let Some(name) = &request.name {
        let name = name.trim();
        check_length("name", name, 1, NAME_MAX_CHARS)?;
        account.name = name.to_string();
    }
    if let Some(email) = &request.email {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(ApiError::bad_field("email", "Invalid email address"));
        }
        account.email = email;
    }
    if let Some(password) = request.new_password {
        check_length(
            "newPassword",
            &password,
            PASSWORD_MIN_CHARS,
            PASSWORD_MAX_CHARS,
        )?;
        let hasher = state.hasher.clone();
        account.password_hash =
            Some(tokio::task::spawn_blocking(move || hasher.hash(&password)).await??);
    }

    let account = state.accounts.update(account).await?;
    info!("Updated profile for account {}", account.id);

    Ok(Json(ProfileResponse {
        message: "Profile updated successfully".to_string(),
        user: PublicAccountView::from(&account),
    }))
}

#[utoipa::path(
    delete,
    path = "/user/{id}",
    params(("id" = String, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account deleted", body = MessageResponse),
        (status = 403, description = "Missing token or not an administrator"),
        (status = 404, description = "User not found"),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn delete_user(
    Extension(state): Extension<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let claims = authenticate(&state, &headers, &method, &uri, &user_admin())?;

    if !state.accounts.delete(&id).await? {
        return Err(ApiError::NotFound("User not found".to_string()));
    }
    info!("Account {id} deleted by {}", claims.user.id);

    Ok(MessageResponse::new("User deleted").into_response())
}
