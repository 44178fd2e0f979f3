//! Secret field encryption
//!
//! AES-256-GCM with the nonce prepended to the ciphertext and the whole
//! token rendered as URL-safe base64. The empty string maps to the
//! empty string in both directions so optional secret fields round-trip
//! without special-casing.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::{EngineError, Result};

/// Nonce length AES-GCM uses, in bytes.
const NONCE_LEN: usize = 12;

/// Symmetric cipher over credential secret fields.
#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Creates a cipher from a 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(EngineError::Cipher(format!(
                "key must be 32 bytes, got {}",
                key.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypts a secret field for storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| EngineError::Cipher(format!("encryption failed: {}", e)))?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Decrypts a stored secret field back to plaintext.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Ok(String::new());
        }

        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| EngineError::Cipher(format!("token is not valid base64: {}", e)))?;
        if raw.len() < NONCE_LEN {
            return Err(EngineError::Cipher("token is too short".to_string()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| EngineError::Cipher("decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| EngineError::Cipher("decrypted value is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> Cipher {
        Cipher::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let c = cipher();
        for secret in ["hunter2", "pa ss\nword", "🔑", "a"] {
            let token = c.encrypt(secret).unwrap();
            assert_ne!(token, secret);
            assert_eq!(c.decrypt(&token).unwrap(), secret);
        }
    }

    #[test]
    fn test_empty_string_round_trips_to_empty() {
        let c = cipher();
        assert_eq!(c.encrypt("").unwrap(), "");
        assert_eq!(c.decrypt("").unwrap(), "");
    }

    #[test]
    fn test_nonce_makes_tokens_unique() {
        let c = cipher();
        let a = c.encrypt("same secret").unwrap();
        let b = c.encrypt("same secret").unwrap();
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a).unwrap(), c.decrypt(&b).unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let token = cipher().encrypt("secret").unwrap();
        let other = Cipher::new(&[8u8; 32]).unwrap();
        assert!(other.decrypt(&token).is_err());
    }

    #[test]
    fn test_garbage_token_fails() {
        let c = cipher();
        assert!(c.decrypt("not base64 ***").is_err());
        assert!(c.decrypt("AAAA").is_err());
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(Cipher::new(&[0u8; 16]).is_err());
    }
}
