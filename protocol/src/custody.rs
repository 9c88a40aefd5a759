//! # Key Custody
//!
//! A member's X25519 private key never leaves custody. The rest of the
//! protocol asks custody to *use* it (unwrap a blob addressed to this member)
//! and never sees the key bytes.
//!
//! The only way key material crosses the boundary is sealed: export produces
//! a [`PasswordBackup`], import consumes one.
//!
//! [`SoftwareCustody`] keeps the key in process memory. A hardware-backed
//! implementation would satisfy the same trait.

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::kdf::{self, KdfError, KdfParams, PasswordBackup};
use crate::crypto::wrap::{self, MemberPublicKey, MemberSecretKey, WrapError};

#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("no private key in local custody")]
    NoLocalKey,

    #[error(transparent)]
    Wrap(#[from] WrapError),

    #[error(transparent)]
    Kdf(#[from] KdfError),
}

/// Opaque private-key capability for the signed-in member.
#[async_trait]
pub trait KeyCustody: Send + Sync {
    async fn has_local_private_key(&self) -> bool;

    /// Generate a fresh key pair, replacing any existing one, and return the
    /// public half.
    async fn generate_and_store_key_pair(&self) -> Result<MemberPublicKey, CustodyError>;

    async fn public_key(&self) -> Result<MemberPublicKey, CustodyError>;

    /// Open a blob produced by [`wrap::wrap_for_member`] for our public key.
    async fn unwrap_with_local_private_key(
        &self,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CustodyError>;

    async fn export_private_key_encrypted_with_password(
        &self,
        password: &str,
        params: &KdfParams,
    ) -> Result<PasswordBackup, CustodyError>;

    /// Replace the local key with the one sealed in `backup`.
    async fn import_private_key_from_password_backup(
        &self,
        password: &str,
        backup: &PasswordBackup,
    ) -> Result<MemberPublicKey, CustodyError>;
}

/// In-memory custody.
#[derive(Default)]
pub struct SoftwareCustody {
    key: RwLock<Option<MemberSecretKey>>,
}

impl SoftwareCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: MemberSecretKey) -> Self {
        Self {
            key: RwLock::new(Some(key)),
        }
    }

    /// Drop the local key, as if the device were lost.
    pub fn forget_local_key(&self) {
        self.key.write().take();
    }
}

#[async_trait]
impl KeyCustody for SoftwareCustody {
    async fn has_local_private_key(&self) -> bool {
        self.key.read().is_some()
    }

    async fn generate_and_store_key_pair(&self) -> Result<MemberPublicKey, CustodyError> {
        let key = MemberSecretKey::generate();
        let public = key.public_key();
        *self.key.write() = Some(key);
        Ok(public)
    }

    async fn public_key(&self) -> Result<MemberPublicKey, CustodyError> {
        self.key
            .read()
            .as_ref()
            .map(MemberSecretKey::public_key)
            .ok_or(CustodyError::NoLocalKey)
    }

    async fn unwrap_with_local_private_key(
        &self,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
        let guard = self.key.read();
        let key = guard.as_ref().ok_or(CustodyError::NoLocalKey)?;
        Ok(Zeroizing::new(wrap::unwrap_with_secret(ciphertext, key)?))
    }

    async fn export_private_key_encrypted_with_password(
        &self,
        password: &str,
        params: &KdfParams,
    ) -> Result<PasswordBackup, CustodyError> {
        let secret = {
            let guard = self.key.read();
            let key = guard.as_ref().ok_or(CustodyError::NoLocalKey)?;
            Zeroizing::new(key.to_bytes())
        };
        Ok(kdf::seal_with_password(secret.as_slice(), password.as_bytes(), params)?)
    }

    async fn import_private_key_from_password_backup(
        &self,
        password: &str,
        backup: &PasswordBackup,
    ) -> Result<MemberPublicKey, CustodyError> {
        let bytes = kdf::open_with_password(backup, password.as_bytes())?;
        let key = MemberSecretKey::from_slice(&bytes)?;
        let public = key.public_key();
        *self.key.write() = Some(key);
        Ok(public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams {
        log_n: 8,
        r: 8,
        p: 1,
    };

    #[tokio::test]
    async fn test_empty_custody() {
        let custody = SoftwareCustody::new();
        assert!(!custody.has_local_private_key().await);
        assert!(matches!(custody.public_key().await, Err(CustodyError::NoLocalKey)));
        assert!(matches!(
            custody.unwrap_with_local_private_key(&[0u8; 80]).await,
            Err(CustodyError::NoLocalKey)
        ));
        assert!(custody
            .export_private_key_encrypted_with_password("pw", &FAST)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_generate_then_unwrap() {
        let custody = SoftwareCustody::new();
        let public = custody.generate_and_store_key_pair().await.unwrap();
        assert!(custody.has_local_private_key().await);
        assert_eq!(custody.public_key().await.unwrap(), public);

        let blob = wrap::wrap_for_member(b"for me", &public).unwrap();
        let opened = custody.unwrap_with_local_private_key(&blob).await.unwrap();
        assert_eq!(opened.as_slice(), b"for me");
    }

    #[tokio::test]
    async fn test_backup_moves_key_to_new_device() {
        let old_device = SoftwareCustody::new();
        let public = old_device.generate_and_store_key_pair().await.unwrap();
        let backup = old_device
            .export_private_key_encrypted_with_password("s3cret", &FAST)
            .await
            .unwrap();
        let blob = wrap::wrap_for_member(b"share", &public).unwrap();

        let new_device = SoftwareCustody::new();
        assert!(matches!(
            new_device
                .import_private_key_from_password_backup("wrong", &backup)
                .await,
            Err(CustodyError::Kdf(KdfError::WrongPassword))
        ));
        assert!(!new_device.has_local_private_key().await);

        let restored = new_device
            .import_private_key_from_password_backup("s3cret", &backup)
            .await
            .unwrap();
        assert_eq!(restored, public);
        assert_eq!(
            new_device.unwrap_with_local_private_key(&blob).await.unwrap().as_slice(),
            b"share"
        );
    }

    #[tokio::test]
    async fn test_forget_local_key() {
        let custody = SoftwareCustody::with_key(MemberSecretKey::generate());
        assert!(custody.has_local_private_key().await);
        custody.forget_local_key();
        assert!(!custody.has_local_private_key().await);
    }
}
