//! Account records behind a storage seam.
//!
//! Routes only talk to `AccountStore`; the auth core never persists anything
//! on its own. `MemoryAccountStore` backs single-instance deployments and tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    auth::{Identity, Role},
    sso::Provider,
};

pub use self::memory::MemoryAccountStore;

/// Display name used when neither the client nor the provider supplied one.
pub const DEFAULT_DISPLAY_NAME: &str = "Tom Nook";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("email already in use")]
    EmailTaken,
    #[error("account not found")]
    NotFound,
    #[error("account storage failure: {0}")]
    Storage(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkedProvider {
    pub provider: Provider,
    pub provider_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub sso_providers: Vec<LinkedProvider>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password_hash.as_deref().is_some_and(|hash| !hash.is_empty())
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
        }
    }

    #[must_use]
    pub fn linked(&self, provider: Provider) -> Option<&LinkedProvider> {
        self.sso_providers.iter().find(|p| p.provider == provider)
    }
}

/// Fields supplied when creating an account.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub sso_providers: Vec<LinkedProvider>,
}

/// Full account view, returned to the owner and to administrators.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub has_password: bool,
    pub sso_providers: Vec<LinkedProvider>,
    pub created_at: DateTime<Utc>,
}

/// Reduced view for callers reading someone else's record.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicAccountView {
    pub id: String,
    pub name: String,
    pub has_password: bool,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            name: account.name.clone(),
            email: account.email.clone(),
            role: account.role,
            has_password: account.has_password(),
            sso_providers: account.sso_providers.clone(),
            created_at: account.created_at,
        }
    }
}

impl From<&Account> for PublicAccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            name: account.name.clone(),
            has_password: account.has_password(),
        }
    }
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// # Errors
    /// `EmailTaken` if another account already uses the email.
    async fn create(&self, account: NewAccount) -> Result<Account, AccountError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Account>, AccountError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountError>;

    async fn find_by_provider(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<Account>, AccountError>;

    /// Replace a stored account.
    ///
    /// # Errors
    /// `NotFound` if the id is unknown, `EmailTaken` if the new email belongs to another account.
    async fn update(&self, account: Account) -> Result<Account, AccountError>;

    /// Returns whether an account was removed.
    async fn delete(&self, id: &str) -> Result<bool, AccountError>;

    async fn list(&self) -> Result<Vec<Account>, AccountError>;
}
