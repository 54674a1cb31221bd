use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};
use ulid::Ulid;

use super::{Account, AccountError, AccountStore, NewAccount, normalize_email};
use crate::sso::Provider;

#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn email_in_use(accounts: &HashMap<String, Account>, email: &str, except: Option<&str>) -> bool {
    accounts
        .values()
        .any(|a| a.email == email && Some(a.id.as_str()) != except)
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn create(&self, account: NewAccount) -> Result<Account, AccountError> {
        let email = normalize_email(&account.email);
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if email_in_use(&accounts, &email, None) {
            return Err(AccountError::EmailTaken);
        }

        let created = Account {
            id: Ulid::new().to_string().to_lowercase(),
            name: account.name,
            email,
            password_hash: account.password_hash,
            role: account.role,
            sso_providers: account.sso_providers,
            created_at: Utc::now(),
        };
        accounts.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Account>, AccountError> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(accounts.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountError> {
        let email = normalize_email(email);
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(accounts.values().find(|a| a.email == email).cloned())
    }

    async fn find_by_provider(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<Account>, AccountError> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(accounts
            .values()
            .find(|a| {
                a.sso_providers
                    .iter()
                    .any(|p| p.provider == provider && p.provider_id == provider_id)
            })
            .cloned())
    }

    async fn update(&self, mut account: Account) -> Result<Account, AccountError> {
        account.email = normalize_email(&account.email);
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !accounts.contains_key(&account.id) {
            return Err(AccountError::NotFound);
        }
        if email_in_use(&accounts, &account.email, Some(&account.id)) {
            return Err(AccountError::EmailTaken);
        }
        accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn delete(&self, id: &str) -> Result<bool, AccountError> {
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(accounts.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<Account>, AccountError> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Account> = accounts.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{accounts::LinkedProvider, auth::Role};
    use anyhow::Result;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            name: "Blathers".to_string(),
            email: email.to_string(),
            password_hash: None,
            role: Role::User,
            sso_providers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email() -> Result<()> {
        let store = MemoryAccountStore::new();
        store.create(new_account("blathers@museum.org")).await?;
        assert_eq!(
            store.create(new_account(" Blathers@Museum.org")).await,
            Err(AccountError::EmailTaken)
        );
        Ok(())
    }

    #[tokio::test]
    async fn lookups() -> Result<()> {
        let store = MemoryAccountStore::new();
        let mut account = new_account("celeste@observatory.net");
        account.sso_providers.push(LinkedProvider {
            provider: Provider::Apple,
            provider_id: "001.abc".to_string(),
            connected_at: Utc::now(),
            last_login: Utc::now(),
        });
        let created = store.create(account).await?;

        assert_eq!(store.find_by_id(&created.id).await?, Some(created.clone()));
        assert_eq!(
            store.find_by_email("CELESTE@observatory.net").await?,
            Some(created.clone())
        );
        assert_eq!(
            store.find_by_provider(Provider::Apple, "001.abc").await?,
            Some(created)
        );
        assert_eq!(store.find_by_provider(Provider::Apple, "002").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn update_checks_email_ownership() -> Result<()> {
        let store = MemoryAccountStore::new();
        let first = store.create(new_account("a@town.hall")).await?;
        let mut second = store.create(new_account("b@town.hall")).await?;

        second.email = first.email.clone();
        assert_eq!(store.update(second.clone()).await, Err(AccountError::EmailTaken));

        // Keeping your own email is fine.
        second.email = "b@town.hall".to_string();
        second.name = "Brewster".to_string();
        assert_eq!(store.update(second.clone()).await?.name, "Brewster");

        let mut ghost = second;
        ghost.id = "missing".to_string();
        assert_eq!(store.update(ghost).await, Err(AccountError::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn delete_and_list() -> Result<()> {
        let store = MemoryAccountStore::new();
        let first = store.create(new_account("a@town.hall")).await?;
        store.create(new_account("b@town.hall")).await?;
        assert_eq!(store.list().await?.len(), 2);
        assert!(store.delete(&first.id).await?);
        assert!(!store.delete(&first.id).await?);
        assert_eq!(store.list().await?.len(), 1);
        Ok(())
    }
}
