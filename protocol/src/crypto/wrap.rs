//! # Member Key Wrapping (X25519 sealed box)
//!
//! Asymmetric encryption of small payloads (envelope keys and master-key
//! shares) to one member's long-term X25519 public key.
//!
//! ## Construction
//!
//! For each wrap a fresh ephemeral X25519 key pair is generated and thrown
//! away afterwards:
//!
//! 1. `shared = X25519(ephemeral_secret, recipient_public)`
//! 2. `key = BLAKE3-derive-key(WRAP_KDF_CONTEXT, shared || ephemeral_public || recipient_public)`
//! 3. `blob = ephemeral_public || AES-256-GCM(key, payload)`
//!
//! The recipient recomputes `shared` with their static secret and the
//! ephemeral public key from the blob. Binding both public keys into the KDF
//! ties the derived key to this exact sender/recipient pair.
//!
//! ## Output size
//!
//! Always `payload.len() + WRAP_OVERHEAD` (32 + 12 + 16 = 60) bytes, so the
//! length of a wrapped blob depends only on the payload length.

use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use super::encryption::{self, SymmetricKey};
use crate::config::{
    AES_KEY_LENGTH, MAX_WRAP_PLAINTEXT_LENGTH, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
    WRAP_KDF_CONTEXT, WRAP_OVERHEAD,
};

/// Errors from wrapping and unwrapping.
#[derive(Debug, Error)]
pub enum WrapError {
    /// The public key is not 32 bytes, or is a low-order point that would
    /// produce an all-zero shared secret.
    #[error("invalid member public key")]
    InvalidKey,

    #[error("payload too large to wrap: {0} bytes (max {MAX_WRAP_PLAINTEXT_LENGTH})")]
    PayloadTooLarge(usize),

    /// Corrupt blob or the wrong private key. Not distinguished on purpose.
    #[error("unwrap failed: corrupt ciphertext or mismatched key")]
    DecryptionFailed,
}

// ---------------------------------------------------------------------------
// Key Types
// ---------------------------------------------------------------------------

/// A member's long-term X25519 public key. Published in the member profile.
///
/// Serializes as a lowercase hex string so stored profiles stay readable.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberPublicKey([u8; PUBLIC_KEY_LENGTH]);

impl MemberPublicKey {
    /// Parse raw key bytes. Fails with [`WrapError::InvalidKey`] on any length
    /// other than 32.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WrapError> {
        let key: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| WrapError::InvalidKey)?;
        Ok(Self(key))
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, WrapError> {
        let bytes = hex::decode(s).map_err(|_| WrapError::InvalidKey)?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for MemberPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemberPublicKey({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for MemberPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for MemberPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MemberPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A member's long-term X25519 secret key.
///
/// Lives only inside a [`KeyCustody`](crate::custody::KeyCustody)
/// implementation. `StaticSecret` zeroizes itself on drop.
pub struct MemberSecretKey(StaticSecret);

impl MemberSecretKey {
    /// Generate a new key pair from the OS CSPRNG.
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_bytes(bytes: [u8; SECRET_KEY_LENGTH]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Length-checked construction, for bytes coming out of a backup.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, WrapError> {
        let key: [u8; SECRET_KEY_LENGTH] = bytes.try_into().map_err(|_| WrapError::InvalidKey)?;
        Ok(Self::from_bytes(key))
    }

    pub fn public_key(&self) -> MemberPublicKey {
        MemberPublicKey(PublicKey::from(&self.0).to_bytes())
    }

    /// Raw secret bytes, only for sealing into a password backup.
    pub fn to_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.0.to_bytes()
    }
}

impl std::fmt::Debug for MemberSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemberSecretKey(public={:?})", self.public_key())
    }
}

// ---------------------------------------------------------------------------
// Wrap / Unwrap
// ---------------------------------------------------------------------------

/// Seal `plaintext` so that only the holder of `recipient`'s secret key can
/// read it.
pub fn wrap_for_member(plaintext: &[u8], recipient: &MemberPublicKey) -> Result<Vec<u8>, WrapError> {
    if plaintext.len() > MAX_WRAP_PLAINTEXT_LENGTH {
        return Err(WrapError::PayloadTooLarge(plaintext.len()));
    }

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(recipient.0));

    if !shared.was_contributory() {
        return Err(WrapError::InvalidKey);
    }

    let key = derive_wrap_key(shared.as_bytes(), ephemeral_public.as_bytes(), &recipient.0);
    let sealed = encryption::encrypt(&key, plaintext).map_err(|_| WrapError::InvalidKey)?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_LENGTH + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a blob produced by [`wrap_for_member`] with the recipient's secret key.
pub fn unwrap_with_secret(data: &[u8], secret: &MemberSecretKey) -> Result<Vec<u8>, WrapError> {
    if data.len() < WRAP_OVERHEAD {
        return Err(WrapError::DecryptionFailed);
    }

    let (ephemeral_bytes, sealed) = data.split_at(PUBLIC_KEY_LENGTH);
    let mut ephemeral = [0u8; PUBLIC_KEY_LENGTH];
    ephemeral.copy_from_slice(ephemeral_bytes);

    let shared = secret.0.diffie_hellman(&PublicKey::from(ephemeral));
    if !shared.was_contributory() {
        return Err(WrapError::DecryptionFailed);
    }

    let key = derive_wrap_key(shared.as_bytes(), &ephemeral, secret.public_key().as_bytes());
    encryption::decrypt(&key, sealed).map_err(|_| WrapError::DecryptionFailed)
}

fn derive_wrap_key(
    shared_secret: &[u8; 32],
    ephemeral_public: &[u8; PUBLIC_KEY_LENGTH],
    recipient_public: &[u8; PUBLIC_KEY_LENGTH],
) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(WRAP_KDF_CONTEXT);
    hasher.update(shared_secret);
    hasher.update(ephemeral_public);
    hasher.update(recipient_public);

    let mut key = [0u8; AES_KEY_LENGTH];
    hasher.finalize_xof().fill(&mut key);
    SymmetricKey::from_bytes(key)
}
