//! # Password-Based Key Derivation
//!
//! scrypt turns a member's password into an AES-256 key that seals their
//! X25519 private key for backup. The backup (ciphertext plus salt) can sit in
//! the shared store next to the member profile: without the password it is
//! just an AES-GCM blob.
//!
//! Same `(password, salt, params)` always yields the same key. A wrong
//! password is only detected when AES-GCM authentication fails on open, and
//! surfaces as [`KdfError::WrongPassword`].

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use super::encryption::{self, EncryptionError, SymmetricKey};
use crate::config::{
    AES_KEY_LENGTH, DEFAULT_SCRYPT_LOG_N, DEFAULT_SCRYPT_P, DEFAULT_SCRYPT_R, KDF_SALT_LENGTH,
};

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("invalid scrypt parameters: log_n={log_n}, r={r}, p={p}")]
    InvalidParameters { log_n: u8, r: u32, p: u32 },

    #[error("key derivation failed")]
    DerivationFailed,

    #[error("wrong password or corrupted backup")]
    WrongPassword,
}

/// scrypt cost parameters. `N = 2^log_n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: DEFAULT_SCRYPT_LOG_N,
            r: DEFAULT_SCRYPT_R,
            p: DEFAULT_SCRYPT_P,
        }
    }
}

impl KdfParams {
    fn to_scrypt(self) -> Result<scrypt::Params, KdfError> {
        scrypt::Params::new(self.log_n, self.r, self.p, AES_KEY_LENGTH).map_err(|_| {
            KdfError::InvalidParameters {
                log_n: self.log_n,
                r: self.r,
                p: self.p,
            }
        })
    }
}

/// Fresh random salt for a new backup.
pub fn generate_salt() -> [u8; KDF_SALT_LENGTH] {
    let mut salt = [0u8; KDF_SALT_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from `password` and `salt`.
pub fn derive_key_from_password(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<SymmetricKey, KdfError> {
    let scrypt_params = params.to_scrypt()?;
    let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    scrypt::scrypt(password, salt, &scrypt_params, key.as_mut_slice())
        .map_err(|_| KdfError::DerivationFailed)?;
    Ok(SymmetricKey::from_bytes(*key))
}

/// A secret sealed under a password-derived key.
///
/// The cost parameters travel with the backup so that a deployment can raise
/// its default without orphaning older backups.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordBackup {
    /// `nonce || ciphertext || tag`, see [`encryption::encrypt`].
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub salt: Vec<u8>,
    pub params: KdfParams,
}

impl std::fmt::Debug for PasswordBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordBackup")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("salt", &hex::encode(&self.salt))
            .field("params", &self.params)
            .finish()
    }
}

/// Seal `secret` under a key derived from `password` with a fresh salt.
pub fn seal_with_password(
    secret: &[u8],
    password: &[u8],
    params: &KdfParams,
) -> Result<PasswordBackup, KdfError> {
    let salt = generate_salt();
    let key = derive_key_from_password(password, &salt, params)?;
    let ciphertext = encryption::encrypt(&key, secret).map_err(|_| KdfError::DerivationFailed)?;
    Ok(PasswordBackup {
        ciphertext,
        salt: salt.to_vec(),
        params: *params,
    })
}

/// Open a [`PasswordBackup`]. The returned bytes are wiped on drop.
pub fn open_with_password(
    backup: &PasswordBackup,
    password: &[u8],
) -> Result<Zeroizing<Vec<u8>>, KdfError> {
    let key = derive_key_from_password(password, &backup.salt, &backup.params)?;
    match encryption::decrypt(&key, &backup.ciphertext) {
        Ok(plaintext) => Ok(Zeroizing::new(plaintext)),
        Err(EncryptionError::AuthenticationFailed) | Err(EncryptionError::CiphertextTooShort) => {
            Err(KdfError::WrongPassword)
        }
        Err(_) => Err(KdfError::DerivationFailed),
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
