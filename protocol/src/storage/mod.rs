//! # Storage Collaborator
//!
//! The protocol never talks to a database directly. It talks to a
//! [`GroupStore`]: a small document-store contract with get/put, a couple of
//! atomic multi-record writes, and live subscriptions.
//!
//! ## Records
//!
//! ```text
//! groups             group_id            -> Group
//! profiles           member_id           -> MemberProfile (public key + password backup)
//! envelopes          group_id/member_id  -> AssignmentEnvelope
//! shares             group_id/member_id  -> wrapped share
//! master_lists       group_id            -> encrypted master list
//! recovered_lists    group_id            -> plaintext master list (after recovery)
//! submissions        group_id            -> { member_id -> RecoverySubmission }
//! ```
//!
//! ## Atomic writes
//!
//! Two writes touch several records at once and must land together or not at
//! all:
//!
//! - [`GroupStore::commit_assignment`]: every envelope, every wrapped share,
//!   the encrypted master list and `pending -> assigned`.
//! - [`GroupStore::finalize_recovery`]: the plaintext master list,
//!   `recovery -> completed`, and deletion of all submissions.
//!
//! Both check the expected source state inside the write and fail with
//! [`StoreError::Conflict`] if someone got there first.
//!
//! ## Subscriptions
//!
//! Each store carries a `tokio::sync::watch` revision counter bumped on every
//! write. Subscriptions re-read their record on every bump and yield only when
//! the value actually changed, so consumers see a deduplicated sequence of
//! snapshots starting with the current one.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`] — `parking_lot::RwLock` over hash maps. Tests, demos.
//! - [`SledStore`] — sled trees with bincode values. The CLI.

pub mod db;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::crypto::kdf::PasswordBackup;
use crate::crypto::wrap::MemberPublicKey;
use crate::group::{Group, GroupId, GroupState, MemberId};

pub use db::SledStore;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The record was not in the state the write expected.
    #[error("conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// What the rest of the group can see about a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub id: MemberId,
    pub public_key: MemberPublicKey,
    /// Private key sealed under the member's password, for moving devices.
    pub key_backup: Option<PasswordBackup>,
}

/// One giver's view of the assignment.
///
/// `encrypted_receiver` is the receiver id under a single-use AES key;
/// `wrapped_key` is that key sealed to the giver's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentEnvelope {
    pub giver: MemberId,
    pub encrypted_receiver: Vec<u8>,
    pub wrapped_key: Vec<u8>,
}

/// A member's master-key share, sealed to that member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedShare {
    pub member: MemberId,
    pub wrapped_share: Vec<u8>,
}

/// Everything `start_matching` produces, written in one go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingBundle {
    pub envelopes: Vec<AssignmentEnvelope>,
    pub shares: Vec<WrappedShare>,
    pub encrypted_master_list: Vec<u8>,
}

/// A member's share, re-sealed to the admin during a recovery episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySubmission {
    pub member: MemberId,
    pub wrapped_for_admin: Vec<u8>,
    pub submitted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// GroupStore
// ---------------------------------------------------------------------------

/// The storage contract the orchestrator is written against.
#[async_trait]
pub trait GroupStore: Send + Sync {
    // -- Groups --------------------------------------------------------------

    /// Insert a new group. `Conflict` if the id is taken.
    async fn create_group(&self, group: &Group) -> StoreResult<()>;

    /// Overwrite an existing group's document (membership, rules).
    async fn update_group(&self, group: &Group) -> StoreResult<()>;

    async fn get_group(&self, id: &GroupId) -> StoreResult<Group>;

    async fn list_groups(&self) -> StoreResult<Vec<Group>>;

    /// Compare-and-set the group state: `Conflict` unless it is currently
    /// `from`.
    async fn set_group_state(&self, id: &GroupId, from: GroupState, to: GroupState)
        -> StoreResult<()>;

    /// Live view of a group: the current document, then every change.
    fn watch_group(&self, id: &GroupId) -> BoxStream<'static, Group>;

    // -- Members -------------------------------------------------------------

    async fn put_member_profile(&self, profile: &MemberProfile) -> StoreResult<()>;

    async fn get_member_profile(&self, id: &MemberId) -> StoreResult<MemberProfile>;

    async fn get_member_public_key(&self, id: &MemberId) -> StoreResult<MemberPublicKey> {
        Ok(self.get_member_profile(id).await?.public_key)
    }

    // -- Assignment ----------------------------------------------------------

    /// Write a whole matching run and move the group `pending -> assigned`.
    async fn commit_assignment(&self, id: &GroupId, bundle: MatchingBundle) -> StoreResult<()>;

    async fn get_assignment_envelope(
        &self,
        id: &GroupId,
        member: &MemberId,
    ) -> StoreResult<AssignmentEnvelope>;

    async fn get_share(&self, id: &GroupId, member: &MemberId) -> StoreResult<Vec<u8>>;

    async fn get_encrypted_master_list(&self, id: &GroupId) -> StoreResult<Vec<u8>>;

    // -- Recovery ------------------------------------------------------------

    /// Record a submission. A member re-submitting replaces their earlier one.
    ///
    /// Fails with [`StoreError::Conflict`] unless the group is in `recovery`,
    /// checked inside the same write.
    async fn submit_recovery_share(
        &self,
        id: &GroupId,
        submission: RecoverySubmission,
    ) -> StoreResult<()>;

    /// Current submissions, ordered by member id.
    async fn recovery_submissions(&self, id: &GroupId) -> StoreResult<Vec<RecoverySubmission>>;

    /// Live view of the submission set.
    fn subscribe_recovery_submissions(
        &self,
        id: &GroupId,
    ) -> BoxStream<'static, Vec<RecoverySubmission>>;

    /// Store the recovered master list, move `recovery -> completed` and drop
    /// all submissions.
    async fn finalize_recovery(&self, id: &GroupId, master_list: Vec<u8>) -> StoreResult<()>;

    async fn get_decrypted_master_list(&self, id: &GroupId) -> StoreResult<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Subscription plumbing
// ---------------------------------------------------------------------------

/// Turn a revision counter plus a synchronous reader into a deduplicated
/// stream of snapshots.
///
/// `read` returning `None` (missing record or read error) yields nothing and
/// waits for the next revision. The stream ends when the store is dropped.
pub(crate) fn revision_stream<T, F>(changes: watch::Receiver<u64>, read: F) -> BoxStream<'static, T>
where
    T: Clone + PartialEq + Send + 'static,
    F: Fn() -> Option<T> + Send + 'static,
{
    stream::unfold(
        (changes, read, None::<T>),
        |(mut changes, read, mut last)| async move {
            loop {
                if let Some(current) = read() {
                    if last.as_ref() != Some(&current) {
                        last = Some(current.clone());
                        return Some((current, (changes, read, last)));
                    }
                }
                if changes.changed().await.is_err() {
                    return None;
                }
            }
        },
    )
    .boxed()
}

pub(crate) fn not_found(what: &str, key: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(format!("{what} {key}"))
}
