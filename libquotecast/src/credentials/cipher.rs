//! In-memory encryption of credential strings
//!
//! Credentials are kept encrypted at rest inside the process with a key that
//! is generated at startup and never leaves memory. Ciphertexts are standard
//! base64 of `nonce || AES-256-GCM(plaintext)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CredentialError;

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Symmetric encryption used by the credential manager
///
/// Implementations must be safe to call concurrently without external
/// locking.
pub trait CredentialCipher: Send + Sync {
    /// Encrypt `plaintext` with a fresh nonce
    fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError>;

    /// Decrypt a value produced by [`CredentialCipher::encrypt`] on the same
    /// instance
    fn decrypt(&self, ciphertext: &str) -> Result<String, CredentialError>;

    /// Whether `text` already looks like ciphertext
    ///
    /// This is a heuristic, not an integrity check: any text that happens to
    /// be valid base64 is reported as encrypted, so a plaintext seed that
    /// decodes as base64 will be stored as-is and fail on first use.
    fn is_encrypted(&self, text: &str) -> bool;
}

/// AES-256-GCM cipher with a per-process random key
pub struct AesGcmCipher {
    aead: Aes256Gcm,
}

impl AesGcmCipher {
    /// Create a cipher with a freshly generated key
    ///
    /// Falls back to a fixed, insecure key (with a warning) if the operating
    /// system's random source is unavailable.
    pub fn new() -> Self {
        let key = generate_key();
        Self::from_key(&key)
    }

    fn from_key(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            aead: Aes256Gcm::new(key.into()),
        }
    }
}

impl Default for AesGcmCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl CredentialCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CredentialError::Randomness(e.to_string()))?;

        let ciphertext = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CredentialError> {
        let sealed = STANDARD
            .decode(ciphertext)
            .map_err(|e| CredentialError::Encoding(e.to_string()))?;

        if sealed.len() < NONCE_SIZE {
            return Err(CredentialError::Authentication(
                "ciphertext too short".to_string(),
            ));
        }

        let (nonce, body) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .aead
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| {
                CredentialError::Authentication("nonce and ciphertext do not verify".to_string())
            })?;

        String::from_utf8(plaintext).map_err(|_| {
            CredentialError::Authentication("decrypted value is not valid UTF-8".to_string())
        })
    }

    fn is_encrypted(&self, text: &str) -> bool {
        STANDARD.decode(text).is_ok()
    }
}

fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    if let Err(e) = OsRng.try_fill_bytes(&mut key[..]) {
        tracing::warn!(
            "Failed to generate secure encryption key ({}); using an INSECURE fallback key",
            e
        );
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cipher = AesGcmCipher::new();
        for plaintext in ["", "access-token", "トークン🔑", "eyJhbGciOiJIUzI1NiJ9.e30.sig"] {
            let sealed = cipher.encrypt(plaintext).unwrap();
            assert_ne!(sealed, plaintext);
            assert_eq!(cipher.decrypt(&sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_nonce_uniqueness() {
        let cipher = AesGcmCipher::new();
        let first = cipher.encrypt("same").unwrap();
        let second = cipher.encrypt("same").unwrap();

        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), "same");
        assert_eq!(cipher.decrypt(&second).unwrap(), "same");
    }

    #[test]
    fn test_instances_do_not_share_keys() {
        let a = AesGcmCipher::new();
        let b = AesGcmCipher::new();

        let sealed = a.encrypt("secret").unwrap();
        assert!(matches!(
            b.decrypt(&sealed),
            Err(CredentialError::Authentication(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_invalid_base64() {
        let cipher = AesGcmCipher::new();
        assert!(matches!(
            cipher.decrypt("not base64!"),
            Err(CredentialError::Encoding(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_short_input() {
        let cipher = AesGcmCipher::new();
        let short = STANDARD.encode([0u8; NONCE_SIZE - 1]);
        assert!(matches!(
            cipher.decrypt(&short),
            Err(CredentialError::Authentication(_))
        ));

        assert!(matches!(
            cipher.decrypt(""),
            Err(CredentialError::Authentication(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_tampering() {
        let cipher = AesGcmCipher::new();
        let mut sealed = STANDARD.decode(cipher.encrypt("secret").unwrap()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(matches!(
            cipher.decrypt(&STANDARD.encode(&sealed)),
            Err(CredentialError::Authentication(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_truncation() {
        let cipher = AesGcmCipher::new();
        let sealed = STANDARD.decode(cipher.encrypt("secret").unwrap()).unwrap();
        let truncated = STANDARD.encode(&sealed[..sealed.len() - 4]);

        assert!(cipher.decrypt(&truncated).is_err());
    }

    #[test]
    fn test_is_encrypted_heuristic() {
        let cipher = AesGcmCipher::new();
        assert!(cipher.is_encrypted(&cipher.encrypt("x").unwrap()));

        // JWTs contain '.', which is outside the base64 alphabet
        assert!(!cipher.is_encrypted("eyJhbGciOiJIUzI1NiJ9.e30.sig"));
        assert!(!cipher.is_encrypted("plain token"));

        // Known weakness: base64-looking plaintext is misclassified
        assert!(cipher.is_encrypted("YWJjZA=="));
    }

    #[test]
    fn test_fixed_key_is_deterministic_across_instances() {
        let key = [7u8; KEY_SIZE];
        let a = AesGcmCipher::from_key(&key);
        let b = AesGcmCipher::from_key(&key);
        assert_eq!(b.decrypt(&a.encrypt("shared").unwrap()).unwrap(), "shared");
    }

    #[test]
    fn test_debug_does_not_expose_key() {
        let output = format!("{:?}", AesGcmCipher::new());
        assert!(output.contains("[REDACTED]"));
    }
}
