//! # AES-256-GCM Envelope Encryption
//!
//! The symmetric half of the envelope layer. Three things get sealed here:
//!
//! - the serialized master list, under the group's master key;
//! - each giver's receiver identifier, under a single-use envelope key;
//! - a member's private key backup, under a password-derived key.
//!
//! ## Nonce management
//!
//! Every call draws a fresh random 96-bit nonce from the OS CSPRNG. Master
//! keys and envelope keys encrypt exactly one message each, and password keys
//! are re-derived with a new salt on every export, so the birthday bound on
//! random nonces never comes into play.
//!
//! ## Wire format
//!
//! `encrypt()` returns `nonce (12) || ciphertext || tag (16)` as one buffer;
//! `decrypt()` expects the same. The blob is self-describing: nothing but the
//! key has to travel separately.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// Deliberately coarse. "Wrong key" and "tampered ciphertext" are the same
/// failure as far as callers are concerned.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("authentication failed: wrong key or tampered ciphertext")]
    AuthenticationFailed,

    #[error("invalid key length: expected {AES_KEY_LENGTH} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("ciphertext too short: need at least {} bytes", AES_NONCE_LENGTH + AES_TAG_LENGTH)]
    CiphertextTooShort,
}

/// A 256-bit AES key. Wiped from memory on drop.
///
/// Used for master keys, single-use envelope keys and password-derived keys.
/// Deliberately not `Clone`, not `Serialize` and not `Debug`-printable: the
/// only way bytes leave this type is [`SymmetricKey::as_bytes`].
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; AES_KEY_LENGTH]);

impl SymmetricKey {
    /// Generate a fresh random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; AES_KEY_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing key bytes.
    pub fn from_bytes(bytes: [u8; AES_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Length-checked construction from an untrusted slice (for example a
    /// freshly reconstructed master key or an unwrapped envelope key).
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EncryptionError> {
        let key: [u8; AES_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| EncryptionError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    /// Raw key bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Encrypt plaintext with AES-256-GCM under a random nonce.
///
/// Returns `nonce || ciphertext || tag`. Empty plaintexts are fine and yield
/// a 28-byte blob.
///
/// # Example
///
/// ```
/// use santa_protocol::crypto::encryption::{decrypt, encrypt, SymmetricKey};
///
/// let key = SymmetricKey::generate();
/// let sealed = encrypt(&key, b"alice -> bob").unwrap();
/// assert_eq!(decrypt(&key, &sealed).unwrap(), b"alice -> bob");
/// ```
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a blob produced by [`encrypt`].
///
/// # Errors
///
/// - [`EncryptionError::CiphertextTooShort`] if the blob cannot even hold a
///   nonce and a tag.
/// - [`EncryptionError::AuthenticationFailed`] for a wrong key or any
///   modification of nonce, ciphertext or tag. This is also how a wrong
///   password and a wrong reconstructed master key show up.
pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if data.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = data.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| EncryptionError::AuthenticationFailed)?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| EncryptionError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SymmetricKey {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        SymmetricKey::from_bytes(key)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let plaintext = b"the quick brown fox jumps over the lazy dog";

        let sealed = encrypt(&key, plaintext).unwrap();
        let recovered = decrypt(&key, &sealed).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_generated_keys_roundtrip() {
        for len in [0usize, 1, 31, 32, 33, 1024] {
            let key = SymmetricKey::generate();
            let plaintext = vec![0x5A; len];
            let sealed = encrypt(&key, &plaintext).unwrap();
            assert_eq!(decrypt(&key, &sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_encrypt_empty_plaintext() {
        let key = test_key();
        let sealed = encrypt(&key, b"").unwrap();
        assert_eq!(sealed.len(), AES_NONCE_LENGTH + AES_TAG_LENGTH);
        assert!(decrypt(&key, &sealed).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_key_is_authentication_failure() {
        let key = test_key();
        let sealed = encrypt(&key, b"secret").unwrap();

        let mut wrong = *test_key().as_bytes();
        wrong[0] ^= 0xFF;
        let wrong_key = SymmetricKey::from_bytes(wrong);

        assert!(matches!(
            decrypt(&wrong_key, &sealed),
            Err(EncryptionError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_every_flipped_bit_is_detected() {
        let key = test_key();
        let sealed = encrypt(&key, b"carol -> dave").unwrap();

        for byte in 0..sealed.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        decrypt(&key, &tampered),
                        Err(EncryptionError::AuthenticationFailed)
                    ),
                    "flip at byte {byte} bit {bit} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn test_unique_nonces() {
        let key = test_key();
        let sealed1 = encrypt(&key, b"message").unwrap();
        let sealed2 = encrypt(&key, b"message").unwrap();
        assert_ne!(&sealed1[..AES_NONCE_LENGTH], &sealed2[..AES_NONCE_LENGTH]);
        assert_ne!(sealed1, sealed2);
    }

    #[test]
    fn test_ciphertext_length() {
        let key = test_key();
        let plaintext = b"exactly 26 bytes of input!";
        let sealed = encrypt(&key, plaintext).unwrap();
        assert_eq!(sealed.len(), AES_NONCE_LENGTH + plaintext.len() + AES_TAG_LENGTH);
    }

    #[test]
    fn test_decrypt_too_short() {
        let key = test_key();
        assert!(matches!(
            decrypt(&key, &[0u8; 4]),
            Err(EncryptionError::CiphertextTooShort)
        ));
        assert!(matches!(
            decrypt(&key, &[0u8; AES_NONCE_LENGTH + AES_TAG_LENGTH - 1]),
            Err(EncryptionError::CiphertextTooShort)
        ));
    }

    #[test]
    fn test_from_slice_checks_length() {
        assert!(matches!(
            SymmetricKey::from_slice(&[0u8; 16]),
            Err(EncryptionError::InvalidKeyLength(16))
        ));
        let key = SymmetricKey::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn test_debug_hides_key() {
        assert_eq!(format!("{:?}", test_key()), "SymmetricKey(..)");
    }
}
