//! Crypto boundary for the credential blob.
//!
//! The manager only sees [`CryptoBoundary`]: bytes in, bytes out, failing with
//! one of two distinguishable kinds. [`AesGcmCrypto`] is the shipped
//! implementation, AES-256-GCM with a fresh nonce per blob. The master key must
//! be 32 bytes (256 bits) and is provided base64-encoded.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Failure kinds a crypto boundary may report.
///
/// The two kinds call for different recovery: an incompatible device never
/// recovers, an invalidated key is recovered by discarding what it protected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The platform lacks the required crypto support. Permanent.
    #[error("device is not compatible with credential encryption: {0}")]
    DeviceIncompatible(String),

    /// Key material is no longer usable (rotated, revoked, re-enrolled).
    #[error("encryption key was invalidated: {0}")]
    KeyInvalidated(String),
}

/// Symmetric encrypt/decrypt capability used to protect the stored blob.
pub trait CryptoBoundary: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Validates that the master key is exactly 32 bytes when base64 decoded.
///
/// # Arguments
/// * `key_base64` - Base64-encoded master key
///
/// # Returns
/// * `Ok(Vec<u8>)` - Decoded key bytes (32 bytes)
/// * `Err` - If key is invalid length or invalid base64
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64)
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// AES-256-GCM crypto boundary.
///
/// Output layout is `nonce (12 bytes) || ciphertext+tag`. A blob that fails
/// authentication was sealed under another key (or tampered with); either way
/// it can never be opened again, so it is reported as [`CryptoError::KeyInvalidated`].
pub struct AesGcmCrypto {
    cipher: Aes256Gcm,
}

impl AesGcmCrypto {
    /// Builds the cipher from a base64-encoded 32-byte master key.
    pub fn from_base64(key_base64: &str) -> Result<Self> {
        let key_bytes = validate_key(key_base64)?;
        Self::new(&key_bytes).map_err(|e| anyhow!(e))
    }

    /// Builds the cipher from raw key bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::DeviceIncompatible(format!(
                "encryption key must be {} bytes",
                KEY_SIZE
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::DeviceIncompatible(format!("failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    /// Generates a random master key, base64-encoded.
    pub fn generate_key() -> String {
        BASE64.encode(Aes256Gcm::generate_key(&mut OsRng))
    }
}

impl CryptoBoundary for AesGcmCrypto {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        // Never reuse a nonce
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::DeviceIncompatible(format!("encryption failed: {}", e)))?;

        let mut output = Vec::with_capacity(NONCE_SIZE + sealed.len());
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&sealed);
        Ok(output)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(CryptoError::KeyInvalidated(format!(
                "ciphertext shorter than nonce: {} bytes",
                ciphertext.len()
            )));
        }

        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher.decrypt(nonce, sealed).map_err(|e| {
            CryptoError::KeyInvalidated(format!("decryption failed (wrong key or corrupted data): {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        // Valid 32-byte key (base64-encoded)
        let valid_key = BASE64.encode([0u8; 32]);
        assert!(validate_key(&valid_key).is_ok());

        // Too short
        let short_key = BASE64.encode([0u8; 16]);
        assert!(validate_key(&short_key).is_err());

        // Invalid base64
        assert!(validate_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_generated_key_is_valid() {
        let key = AesGcmCrypto::generate_key();
        assert_eq!(validate_key(&key).unwrap().len(), KEY_SIZE);
        assert!(AesGcmCrypto::from_base64(&key).is_ok());
    }

    #[test]
    fn test_raw_key_of_wrong_size_is_incompatible() {
        let result = AesGcmCrypto::new(&[0u8; 16]);
        assert!(matches!(result, Err(CryptoError::DeviceIncompatible(_))));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let crypto = AesGcmCrypto::new(&[7u8; 32]).unwrap();
        let plaintext = br#"{"access_token":"abc"}"#;

        let sealed = crypto.encrypt(plaintext).unwrap();
        assert_ne!(&sealed[NONCE_SIZE..], &plaintext[..]);

        assert_eq!(crypto.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_different_nonces() {
        let crypto = AesGcmCrypto::new(&[0u8; 32]).unwrap();

        let first = crypto.encrypt(b"same-plaintext").unwrap();
        let second = crypto.encrypt(b"same-plaintext").unwrap();

        assert_ne!(first[..NONCE_SIZE], second[..NONCE_SIZE]);
        assert_ne!(first, second);
    }

    #[test]
    fn test_wrong_key_reports_invalidated_key() {
        let sealer = AesGcmCrypto::new(&[0u8; 32]).unwrap();
        let opener = AesGcmCrypto::new(&[1u8; 32]).unwrap();

        let sealed = sealer.encrypt(b"secret").unwrap();
        assert!(matches!(
            opener.decrypt(&sealed),
            Err(CryptoError::KeyInvalidated(_))
        ));
    }

    #[test]
    fn test_tampered_or_truncated_ciphertext() {
        let crypto = AesGcmCrypto::new(&[0u8; 32]).unwrap();

        let mut sealed = crypto.encrypt(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(matches!(
            crypto.decrypt(&sealed),
            Err(CryptoError::KeyInvalidated(_))
        ));

        assert!(matches!(
            crypto.decrypt(&[1, 2, 3]),
            Err(CryptoError::KeyInvalidated(_))
        ));
    }
}
