//! Credential persistence boundary

pub mod memory;

pub use memory::*;

use async_trait::async_trait;
use crate::errors::{AggregatorError, AggregatorResult};
use crate::types::{Credential, CredentialId, DecryptedCredential};
use crate::vault::CredentialVault;

/// CRUD surface the session reads credentials through.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_enabled_credentials(&self, user_id: &str) -> AggregatorResult<Vec<Credential>>;

    async fn get_credential(&self, id: CredentialId) -> AggregatorResult<Option<Credential>>;

    async fn mark_credential_test_result(
        &self,
        id: CredentialId,
        success: bool,
        message: &str,
    ) -> AggregatorResult<()>;

    /// Fetch and decrypt one credential. The caller must drop the result as
    /// soon as the connection is built.
    async fn get_decrypted_credential(
        &self,
        id: CredentialId,
        vault: &CredentialVault,
    ) -> AggregatorResult<DecryptedCredential> {
        let credential = self.get_credential(id).await?.ok_or_else(|| {
            AggregatorError::CredentialStore {
                message: format!("credential {} not found", id),
                source: None,
            }
        })?;
        decrypt_credential(&credential, vault)
    }
}

pub fn decrypt_credential(
    credential: &Credential,
    vault: &CredentialVault,
) -> AggregatorResult<DecryptedCredential> {
    let wrap = |source| AggregatorError::CredentialDecryption {
        exchange: credential.exchange.clone(),
        source,
    };

    Ok(DecryptedCredential {
        api_key: vault.decrypt(&credential.encrypted_api_key).map_err(wrap)?,
        secret: vault.decrypt(&credential.encrypted_secret).map_err(wrap)?,
        passphrase: credential
            .encrypted_passphrase
            .as_deref()
            .map(|p| vault.decrypt(p))
            .transpose()
            .map_err(wrap)?,
    })
}
