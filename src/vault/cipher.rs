//! Versioned AEAD credential vault

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use parking_lot::RwLock;
use sha2::Sha256;
use std::fmt;
use tracing::debug;
use zeroize::Zeroizing;
use crate::errors::{VaultError, VaultResult};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KDF_SALT: &[u8] = b"xarb-aggregator/credential-vault";

/// Envelope versions understood by [`CredentialVault::decrypt`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherVersion {
    /// ChaCha20-Poly1305, HKDF-SHA256 per-user key, random 96-bit nonce
    V1,
}

impl CipherVersion {
    pub const CURRENT: CipherVersion = CipherVersion::V1;

    pub fn tag(&self) -> &'static str {
        match self {
            CipherVersion::V1 => "v1",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "v1" => Some(CipherVersion::V1),
            _ => None,
        }
    }
}

struct UserKey {
    user_id: String,
    key: Zeroizing<[u8; KEY_LEN]>,
}

/// Encrypts credentials at rest under a key derived for the current user.
///
/// Ciphertext format: `"<version>:" + base64(nonce || ciphertext || tag)`.
/// The version tag is authenticated as associated data, so a record cannot be
/// relabelled to another version without failing decryption.
pub struct CredentialVault {
    master_secret: Zeroizing<Vec<u8>>,
    active: RwLock<Option<UserKey>>,
}

impl CredentialVault {
    pub fn new(master_secret: impl AsRef<[u8]>) -> Self {
        Self {
            master_secret: Zeroizing::new(master_secret.as_ref().to_vec()),
            active: RwLock::new(None),
        }
    }

    /// Derive and cache the key for `user_id`, replacing any previous user's key.
    pub fn initialize_for_user(&self, user_id: &str) -> VaultResult<()> {
        let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), &self.master_secret);
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        hk.expand(user_id.as_bytes(), &mut key[..])
            .map_err(|e| VaultError::Encryption { reason: format!("key derivation failed: {}", e) })?;

        *self.active.write() = Some(UserKey {
            user_id: user_id.to_string(),
            key,
        });
        debug!(user_id, "Credential vault initialized");
        Ok(())
    }

    /// Drop cached key material. Safe to call when uninitialized.
    pub fn reset(&self) {
        if self.active.write().take().is_some() {
            debug!("Credential vault reset");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn current_user(&self) -> Option<String> {
        self.active.read().as_ref().map(|k| k.user_id.clone())
    }

    pub fn encrypt(&self, plaintext: &str) -> VaultResult<String> {
        let guard = self.active.read();
        let user_key = guard.as_ref().ok_or(VaultError::NotInitialized)?;
        let version = CipherVersion::CURRENT;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&user_key.key[..]));
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: version.tag().as_bytes(),
                },
            )
            .map_err(|_| VaultError::Encryption { reason: "AEAD seal failed".to_string() })?;

        let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&sealed);

        Ok(format!("{}:{}", version.tag(), STANDARD.encode(payload)))
    }

    pub fn decrypt(&self, ciphertext: &str) -> VaultResult<String> {
        let guard = self.active.read();
        let user_key = guard.as_ref().ok_or(VaultError::NotInitialized)?;

        let (tag, body) = ciphertext
            .split_once(':')
            .ok_or_else(|| VaultError::decryption("missing version prefix"))?;
        let version = CipherVersion::parse(tag)
            .ok_or_else(|| VaultError::decryption(format!("unknown cipher version '{}'", tag)))?;

        match version {
            CipherVersion::V1 => {
                let payload = STANDARD
                    .decode(body)
                    .map_err(|_| VaultError::decryption("malformed base64 payload"))?;
                if payload.len() < NONCE_LEN + TAG_LEN {
                    return Err(VaultError::decryption("payload too short"));
                }

                let (nonce_bytes, sealed) = payload.split_at(NONCE_LEN);
                let cipher = ChaCha20Poly1305::new(Key::from_slice(&user_key.key[..]));
                let plaintext = Zeroizing::new(
                    cipher
                        .decrypt(
                            Nonce::from_slice(nonce_bytes),
                            Payload {
                                msg: sealed,
                                aad: version.tag().as_bytes(),
                            },
                        )
                        .map_err(|_| VaultError::decryption("authentication failed"))?,
                );

                String::from_utf8(plaintext.to_vec())
                    .map_err(|_| VaultError::decryption("plaintext is not valid UTF-8"))
            }
        }
    }
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("user", &self.current_user())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_for(user: &str) -> CredentialVault {
        let vault = CredentialVault::new("test-master-secret");
        vault.initialize_for_user(user).unwrap();
        vault
    }

    #[test]
    fn test_round_trip() {
        let vault = vault_for("alice");
        let sealed = vault.encrypt("api-key-123").unwrap();
        assert!(sealed.starts_with("v1:"));
        assert_ne!(sealed, "api-key-123");
        assert_eq!(vault.decrypt(&sealed).unwrap(), "api-key-123");
    }

    #[test]
    fn test_nonce_is_fresh_per_record() {
        let vault = vault_for("alice");
        let a = vault.encrypt("same").unwrap();
        let b = vault.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_requires_initialization() {
        let vault = CredentialVault::new("test-master-secret");
        assert_eq!(vault.encrypt("x"), Err(VaultError::NotInitialized));
        assert_eq!(vault.decrypt("v1:AAAA"), Err(VaultError::NotInitialized));
    }

    #[test]
    fn test_reset_is_safe_when_uninitialized() {
        let vault = CredentialVault::new("test-master-secret");
        vault.reset();
        vault.reset();
        assert!(!vault.is_initialized());
    }

    #[test]
    fn test_reset_discards_key() {
        let vault = vault_for("alice");
        let sealed = vault.encrypt("secret").unwrap();
        vault.reset();
        assert_eq!(vault.decrypt(&sealed), Err(VaultError::NotInitialized));
    }

    #[test]
    fn test_unknown_version_fails_closed() {
        let vault = vault_for("alice");
        let sealed = vault.encrypt("secret").unwrap();
        let relabelled = sealed.replacen("v1:", "v2:", 1);
        assert!(matches!(vault.decrypt(&relabelled), Err(VaultError::Decryption { .. })));
        assert!(matches!(vault.decrypt("no-prefix"), Err(VaultError::Decryption { .. })));
    }

    #[test]
    fn test_malformed_payload_fails_closed() {
        let vault = vault_for("alice");
        assert!(matches!(vault.decrypt("v1:!!!not-base64"), Err(VaultError::Decryption { .. })));
        assert!(matches!(vault.decrypt("v1:AAAA"), Err(VaultError::Decryption { .. })));
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let vault = vault_for("alice");
        let sealed = vault.encrypt("secret").unwrap();
        let (_, body) = sealed.split_once(':').unwrap();
        let mut bytes = STANDARD.decode(body).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = format!("v1:{}", STANDARD.encode(bytes));
        assert!(matches!(vault.decrypt(&tampered), Err(VaultError::Decryption { .. })));
    }

    #[test]
    fn test_keys_are_per_user() {
        let alice = vault_for("alice");
        let sealed = alice.encrypt("secret").unwrap();

        let bob = vault_for("bob");
        assert!(matches!(bob.decrypt(&sealed), Err(VaultError::Decryption { .. })));

        // Same master secret and user derive the same key
        let alice_again = vault_for("alice");
        assert_eq!(alice_again.decrypt(&sealed).unwrap(), "secret");
    }
}
