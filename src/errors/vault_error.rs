//! Credential vault errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Vault is not initialized for a user")]
    NotInitialized,

    #[error("Decryption failed: {reason}")]
    Decryption { reason: String },

    #[error("Encryption failed: {reason}")]
    Encryption { reason: String },
}

impl VaultError {
    pub(crate) fn decryption(reason: impl Into<String>) -> Self {
        VaultError::Decryption { reason: reason.into() }
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
