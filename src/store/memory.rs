//! In-process credential store

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;
use crate::errors::{AggregatorError, AggregatorResult};
use crate::types::{Credential, CredentialId, CredentialTestResult, ExchangeId};
use crate::vault::CredentialVault;
use super::CredentialStore;

/// Plaintext key material handed to [`InMemoryCredentialStore::add_credential`].
pub struct NewCredential<'a> {
    pub user_id: &'a str,
    pub exchange: ExchangeId,
    pub api_key: &'a str,
    pub secret: &'a str,
    pub passphrase: Option<&'a str>,
}

/// Insertion-ordered credential list kept in memory.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: RwLock<Vec<Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encrypt with `vault` and store. The vault must be initialized for the
    /// credential's owner.
    pub fn add_credential(
        &self,
        vault: &CredentialVault,
        new: NewCredential<'_>,
    ) -> AggregatorResult<CredentialId> {
        let encrypt = |plaintext: &str| {
            vault.encrypt(plaintext).map_err(|source| AggregatorError::CredentialDecryption {
                exchange: new.exchange.clone(),
                source,
            })
        };

        let credential = Credential {
            id: Uuid::new_v4(),
            user_id: new.user_id.to_string(),
            exchange: new.exchange.clone(),
            encrypted_api_key: encrypt(new.api_key)?,
            encrypted_secret: encrypt(new.secret)?,
            encrypted_passphrase: new.passphrase.map(encrypt).transpose()?,
            enabled: true,
            last_test: None,
            created_at: Utc::now(),
        };

        let id = credential.id;
        info!(exchange = %credential.exchange, %id, "Credential stored");
        self.credentials.write().push(credential);
        Ok(id)
    }

    /// Store an already encrypted record as-is.
    pub fn insert(&self, credential: Credential) -> CredentialId {
        let id = credential.id;
        self.credentials.write().push(credential);
        id
    }

    pub fn set_enabled(&self, id: CredentialId, enabled: bool) -> bool {
        self.update(id, |c| c.enabled = enabled)
    }

    pub fn update(&self, id: CredentialId, apply: impl FnOnce(&mut Credential)) -> bool {
        match self.credentials.write().iter_mut().find(|c| c.id == id) {
            Some(credential) => {
                apply(credential);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: CredentialId) -> bool {
        let mut credentials = self.credentials.write();
        let before = credentials.len();
        credentials.retain(|c| c.id != id);
        credentials.len() != before
    }

    pub fn all(&self) -> Vec<Credential> {
        self.credentials.read().clone()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_enabled_credentials(&self, user_id: &str) -> AggregatorResult<Vec<Credential>> {
        Ok(self
            .credentials
            .read()
            .iter()
            .filter(|c| c.enabled && c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_credential(&self, id: CredentialId) -> AggregatorResult<Option<Credential>> {
        Ok(self.credentials.read().iter().find(|c| c.id == id).cloned())
    }

    async fn mark_credential_test_result(
        &self,
        id: CredentialId,
        success: bool,
        message: &str,
    ) -> AggregatorResult<()> {
        let found = self.update(id, |c| {
            c.last_test = Some(CredentialTestResult {
                success,
                message: message.to_string(),
                tested_at: Utc::now(),
            });
        });
        if !found {
            return Err(AggregatorError::CredentialStore {
                message: format!("credential {} not found", id),
                source: None,
            });
        }
        debug!(%id, success, "Credential test result recorded");
        Ok(())
    }
}
