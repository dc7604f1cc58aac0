//! Identity records and their password hashes.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::AuthError;
use crate::models::{normalize_email, Identity, IdentityStatus, Role};
use crate::utils::PasswordHashString;

#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub identity: Identity,
    pub password_hash: PasswordHashString,
}

/// Owner of identity records. Emails are unique case-insensitively.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert(
        &self,
        identity: Identity,
        password_hash: PasswordHashString,
    ) -> Result<Identity, AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredential>, AuthError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, AuthError>;

    /// Change role; the permission list is replaced with the role's defaults.
    async fn update_role(&self, id: &str, role: Role) -> Result<Identity, AuthError>;

    async fn set_status(&self, id: &str, status: IdentityStatus) -> Result<Identity, AuthError>;
}

#[derive(Default)]
struct Records {
    by_id: HashMap<String, StoredCredential>,
    /// normalized email -> id
    email_index: HashMap<String, String>,
}

/// Single-process store; read-mostly, so one `RwLock` covers both maps.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    records: RwLock<Records>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn insert(
        &self,
        identity: Identity,
        password_hash: PasswordHashString,
    ) -> Result<Identity, AuthError> {
        let key = normalize_email(&identity.email);
        let mut records = self.records.write().await;

        if records.email_index.contains_key(&key) {
            return Err(AuthError::EmailTaken);
        }

        records.email_index.insert(key, identity.id.clone());
        records.by_id.insert(
            identity.id.clone(),
            StoredCredential {
                identity: identity.clone(),
                password_hash,
            },
        );
        Ok(identity)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredential>, AuthError> {
        let records = self.records.read().await;
        Ok(records
            .email_index
            .get(&normalize_email(email))
            .and_then(|id| records.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, AuthError> {
        let records = self.records.read().await;
        Ok(records.by_id.get(id).map(|c| c.identity.clone()))
    }

    async fn update_role(&self, id: &str, role: Role) -> Result<Identity, AuthError> {
        let mut records = self.records.write().await;
        let stored = records
            .by_id
            .get_mut(id)
            .ok_or(AuthError::NotFound("Identity"))?;
        stored.identity.assign_role(role);
        Ok(stored.identity.clone())
    }

    async fn set_status(&self, id: &str, status: IdentityStatus) -> Result<Identity, AuthError> {
        let mut records = self.records.write().await;
        let stored = records
            .by_id
            .get_mut(id)
            .ok_or(AuthError::NotFound("Identity"))?;
        stored.identity.status = status;
        Ok(stored.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> PasswordHashString {
        PasswordHashString::new("$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string())
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_insensitive() {
        let store = InMemoryCredentialStore::new();
        let identity = store
            .insert(Identity::new("Alice@Example.com", Role::Viewer, None), hash())
            .await
            .unwrap();

        let found = store.find_by_email("alice@example.COM").await.unwrap().unwrap();
        assert_eq!(found.identity.id, identity.id);
        assert!(store.find_by_email("bob@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected() {
        let store = InMemoryCredentialStore::new();
        store
            .insert(Identity::new("alice@example.com", Role::Viewer, None), hash())
            .await
            .unwrap();

        let result = store
            .insert(Identity::new("ALICE@example.com", Role::Editor, None), hash())
            .await;
        assert!(matches!(result, Err(AuthError::EmailTaken)));
    }

    #[tokio::test]
    async fn test_update_role_replaces_permissions() {
        let store = InMemoryCredentialStore::new();
        let identity = store
            .insert(Identity::new("carol@example.com", Role::Viewer, None), hash())
            .await
            .unwrap();

        let updated = store.update_role(&identity.id, Role::Admin).await.unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert!(updated.permissions.contains(&"users.*".to_string()));

        let reloaded = store.find_by_id(&identity.id).await.unwrap().unwrap();
        assert_eq!(reloaded.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_set_status_on_unknown_id() {
        let store = InMemoryCredentialStore::new();
        let result = store.set_status("missing", IdentityStatus::Deactivated).await;
        assert!(matches!(result, Err(AuthError::NotFound(_))));
    }
}
