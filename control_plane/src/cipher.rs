//! Encryption of credentials at rest.
//!
//! Payment method details are sealed with AES-256-GCM before they are
//! stored. A sealed value is `base64(nonce || ciphertext || tag)`.

use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Key must be {KEY_LEN} bytes long, got {0}")]
    KeyLength(usize),
    #[error("Sealed value is too short")]
    Truncated,
    #[error("Encryption failed")]
    Encrypt,
    #[error("Decryption failed")]
    Decrypt,
}

#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Builds the cipher from the base64 key of the configuration.
    pub fn from_base64_key(key: &str) -> Result<Self, CipherError> {
        let bytes = STANDARD.decode(key.trim())?;
        let key = <[u8; KEY_LEN]>::try_from(bytes.as_slice())
            .map_err(|_| CipherError::KeyLength(bytes.len()))?;

        Ok(Self::new(&key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String, CipherError> {
        let bytes = STANDARD.decode(sealed)?;
        if bytes.len() <= NONCE_LEN {
            return Err(CipherError::Truncated);
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Decrypt)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn cipher() -> Cipher {
        Cipher::new(&[7; KEY_LEN])
    }

    #[test]
    fn sealed_values_open_with_the_same_key_only() {
        let sealed = cipher()
            .encrypt(r#"{"customer":"cus_1"}"#)
            .expect("Should encrypt");

        assert!(!sealed.contains("cus_1"));
        assert_eq!(
            r#"{"customer":"cus_1"}"#,
            cipher().decrypt(&sealed).expect("Should decrypt")
        );
        assert_eq!(
            Err(CipherError::Decrypt),
            Cipher::new(&[8; KEY_LEN]).decrypt(&sealed)
        );
    }

    #[test]
    fn every_encryption_uses_a_new_nonce() {
        let cipher = cipher();

        assert_ne!(
            cipher.encrypt("secret").expect("Should encrypt"),
            cipher.encrypt("secret").expect("Should encrypt")
        );
    }

    #[test]
    fn keys_must_be_32_bytes() {
        let key = STANDARD.encode([1_u8; KEY_LEN]);
        assert!(Cipher::from_base64_key(&key).is_ok());

        let short = STANDARD.encode([1_u8; 16]);
        assert_eq!(
            CipherError::KeyLength(16),
            Cipher::from_base64_key(&short).expect_err("Should reject the key")
        );
    }

    #[test]
    fn truncated_values_are_rejected() {
        let truncated = STANDARD.encode([0_u8; 4]);

        assert_eq!(Err(CipherError::Truncated), cipher().decrypt(&truncated));
    }
}
