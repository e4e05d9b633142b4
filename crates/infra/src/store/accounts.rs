use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use warden_auth::{AuthResult, Role, hash_password};
use warden_core::AccountId;

use crate::InfraError;

/// Login-capable account, as owned by the entity-management side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub email: String,
    /// Argon2 PHC string.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Build an account, hashing `password` with a fresh salt.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: &str,
        role: impl Into<Role>,
    ) -> AuthResult<Self> {
        Ok(Self {
            id: AccountId::new(),
            name: name.into(),
            email: email.into(),
            password_hash: hash_password(password)?,
            role: role.into(),
            created_at: Utc::now(),
            deleted_at: None,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Read access to non-deleted accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, InfraError>;

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, InfraError>;
}

#[async_trait]
impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, InfraError> {
        (**self).find_by_email(email).await
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, InfraError> {
        (**self).find_by_id(id).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<Vec<Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: Account) {
        self.accounts.write().push(account);
    }

    pub fn soft_delete(&self, id: AccountId) -> bool {
        let mut accounts = self.accounts.write();
        match accounts.iter_mut().find(|a| a.id == id && !a.is_deleted()) {
            Some(account) => {
                account.deleted_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, InfraError> {
        Ok(self
            .accounts
            .read()
            .iter()
            .find(|a| !a.is_deleted() && a.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, InfraError> {
        Ok(self
            .accounts
            .read()
            .iter()
            .find(|a| !a.is_deleted() && a.id == id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn soft_deleted_accounts_are_invisible() {
        let store = InMemoryAccountStore::new();
        let account = Account::new("Ann", "a@b.com", "secret", "admin").unwrap();
        let id = account.id;
        store.insert(account);

        assert!(store.find_by_email("a@b.com").await.unwrap().is_some());
        assert!(store.soft_delete(id));
        assert!(store.find_by_email("a@b.com").await.unwrap().is_none());
        assert!(store.find_by_id(id).await.unwrap().is_none());
    }
}
