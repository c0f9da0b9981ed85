//! Exchange credential types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};
use super::ExchangeId;

pub type CredentialId = Uuid;

/// Stored credential. Key material is vault ciphertext, never plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    pub id: CredentialId,
    pub user_id: String,
    pub exchange: ExchangeId,
    pub encrypted_api_key: String,
    pub encrypted_secret: String,
    pub encrypted_passphrase: Option<String>,
    pub enabled: bool,
    pub last_test: Option<CredentialTestResult>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialTestResult {
    pub success: bool,
    pub message: String,
    pub tested_at: DateTime<Utc>,
}

/// Plaintext credential handed to a connection constructor.
///
/// Wiped on drop and redacted in debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DecryptedCredential {
    pub api_key: String,
    pub secret: String,
    pub passphrase: Option<String>,
}

impl fmt::Debug for DecryptedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedCredential")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
