//! Credential encryption and API token generation.
//!
//! Stored provider keys are sealed with AES-256-GCM. The wire form of a
//! sealed value is url-safe base64 over `nonce || ciphertext`, with a fresh
//! random 96-bit nonce per encryption.

use crate::error::NutgrafError;
use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::RngCore;
use tracing::warn;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Issued API tokens are `ng_` followed by 43 url-safe base64 characters
/// (32 random bytes, unpadded).
pub const API_TOKEN_PREFIX: &str = "ng_";
const API_TOKEN_RANDOM_BYTES: usize = 32;

#[derive(Clone)]
pub struct EncryptionKey {
    cipher: Aes256Gcm,
}

impl EncryptionKey {
    /// Build a key from its url-safe base64 encoding, typically sourced from
    /// the environment.
    pub fn from_base64(encoded: &str) -> Result<Self, NutgrafError> {
        let bytes = URL_SAFE
            .decode(encoded)
            .map_err(|e| NutgrafError::ConfigurationError(format!("Invalid encryption key: {}", e)))?;

        if bytes.len() != KEY_LEN {
            return Err(NutgrafError::ConfigurationError(format!(
                "Encryption key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }

        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Generate an ephemeral key. Values sealed with it are unreadable after
    /// restart, so this is only suitable for development.
    pub fn generate() -> Self {
        warn!("no encryption key configured, generating an ephemeral one; stored credentials will not survive a restart");
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, NutgrafError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| NutgrafError::ConfigurationError("Encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String, NutgrafError> {
        let bytes = URL_SAFE
            .decode(sealed)
            .map_err(|_| NutgrafError::ConfigurationError("Malformed sealed value".to_string()))?;

        if bytes.len() < NONCE_LEN {
            return Err(NutgrafError::ConfigurationError(
                "Malformed sealed value".to_string(),
            ));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| NutgrafError::ConfigurationError("Decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| NutgrafError::ConfigurationError("Decrypted value is not UTF-8".to_string()))
    }
}

/// Mint a new API token: `ng_` plus 32 random bytes, url-safe base64 without
/// padding (43 characters).
pub fn generate_api_token() -> String {
    let mut bytes = [0u8; API_TOKEN_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", API_TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

/// Check the shape of a presented token without consulting storage.
pub fn is_api_token_shape(token: &str) -> bool {
    match token.strip_prefix(API_TOKEN_PREFIX) {
        Some(rest) => {
            rest.len() == 43
                && rest
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = EncryptionKey::generate();
        let sealed = key.encrypt("sk-abc123").unwrap();
        assert_ne!(sealed, "sk-abc123");
        assert_eq!(key.decrypt(&sealed).unwrap(), "sk-abc123");
    }

    #[test]
    fn test_each_encryption_uses_a_fresh_nonce() {
        let key = EncryptionKey::generate();
        let a = key.encrypt("same plaintext").unwrap();
        let b = key.encrypt("same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let sealed = EncryptionKey::generate().encrypt("secret").unwrap();
        assert!(EncryptionKey::generate().decrypt(&sealed).is_err());
    }

    #[test]
    fn test_key_from_base64_rejects_bad_lengths() {
        assert!(EncryptionKey::from_base64("c2hvcnQ=").is_err());
        assert!(EncryptionKey::from_base64("not base64 at all!").is_err());
    }

    #[test]
    fn test_key_from_base64_round_trip() {
        let encoded = URL_SAFE.encode([7u8; 32]);
        let key = EncryptionKey::from_base64(&encoded).unwrap();
        let sealed = key.encrypt("hello").unwrap();
        assert_eq!(key.decrypt(&sealed).unwrap(), "hello");
    }

    #[test]
    fn test_generated_tokens_have_expected_shape() {
        let token = generate_api_token();
        assert!(token.starts_with("ng_"));
        assert_eq!(token.len(), 3 + 43);
        assert!(is_api_token_shape(&token));
    }

    #[test]
    fn test_token_shape_rejects_malformed_input() {
        assert!(!is_api_token_shape("sk-12345"));
        assert!(!is_api_token_shape("ng_short"));
        assert!(!is_api_token_shape(""));
    }
}
