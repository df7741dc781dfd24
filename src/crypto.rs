//! Token encryption module using AES-256-GCM
//!
//! VCS provider API tokens are stored encrypted, with the provider id bound
//! in as additional authenticated data so ciphertexts cannot be swapped
//! between rows.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("decrypted token is not valid UTF-8")]
    InvalidUtf8,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt bytes using AES-256-GCM
///
/// Output layout: `version || nonce || ciphertext || tag`.
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < MIN_ENCRYPTED_LEN || ciphertext[0] != VERSION_ENCRYPTED {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];
    debug_assert!(tag_and_ct.len() >= TAG_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

fn provider_token_aad(vcs_provider_id: Uuid) -> Vec<u8> {
    format!("vcs_provider:{vcs_provider_id}:token").into_bytes()
}

/// Encrypts a VCS provider API token for storage.
pub fn encrypt_provider_token(
    key: &CryptoKey,
    vcs_provider_id: Uuid,
    token: &str,
) -> Result<Vec<u8>, CryptoError> {
    encrypt_bytes(key, &provider_token_aad(vcs_provider_id), token.as_bytes())
}

/// Decrypts a stored VCS provider API token.
pub fn decrypt_provider_token(
    key: &CryptoKey,
    vcs_provider_id: Uuid,
    ciphertext: &[u8],
) -> Result<Zeroizing<String>, CryptoError> {
    let bytes = Zeroizing::new(decrypt_bytes(
        key,
        &provider_token_aad(vcs_provider_id),
        ciphertext,
    )?);
    std::str::from_utf8(&bytes)
        .map(|token| Zeroizing::new(token.to_string()))
        .map_err(|_| CryptoError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0x42; 32]).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let id = Uuid::new_v4();

        let ciphertext = encrypt_provider_token(&key, id, "ghp_secret").unwrap();
        assert!(!ciphertext.windows(10).any(|w| w == b"ghp_secret"));

        let token = decrypt_provider_token(&key, id, &ciphertext).unwrap();
        assert_eq!(token.as_str(), "ghp_secret");
    }

    #[test]
    fn test_ciphertext_bound_to_provider_id() {
        let key = test_key();
        let ciphertext = encrypt_provider_token(&key, Uuid::new_v4(), "token").unwrap();

        assert!(matches!(
            decrypt_provider_token(&key, Uuid::new_v4(), &ciphertext),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let mut ciphertext = encrypt_bytes(&key, b"aad", b"payload").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;

        assert!(decrypt_bytes(&key, b"aad", &ciphertext).is_err());
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let a = encrypt_bytes(&key, b"aad", b"same").unwrap();
        let b = encrypt_bytes(&key, b"aad", b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn test_insufficient_ciphertext_length() {
        let key = test_key();
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[VERSION_ENCRYPTED, 1, 2, 3]),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[]),
            Err(CryptoError::InvalidFormat)
        ));
    }
}
