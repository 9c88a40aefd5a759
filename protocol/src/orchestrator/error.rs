//! Error type for coordinator operations.
//!
//! Every [`GroupCoordinator`](super::GroupCoordinator) method returns a
//! [`ProtocolError`]. Lower-level errors convert in with `?`; the handful of
//! protocol-level conditions (wrong caller, wrong state, not enough shares)
//! are variants of their own.

use thiserror::Error;

use crate::crypto::encryption::EncryptionError;
use crate::crypto::kdf::KdfError;
use crate::crypto::shamir::ShamirError;
use crate::crypto::wrap::WrapError;
use crate::custody::CustodyError;
use crate::group::matching::MatchingError;
use crate::group::{GroupError, GroupId, GroupState, MemberId};
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The identity provider has no current member.
    #[error("not signed in")]
    NotSignedIn,

    /// A profile already exists for this member. Re-enrolling would orphan
    /// every share wrapped for the old key.
    #[error("{0} is already enrolled")]
    AlreadyEnrolled(MemberId),

    #[error("{member} is not the admin of group {group}")]
    NotAdmin { group: GroupId, member: MemberId },

    #[error("{member} is not a member of group {group}")]
    NotAMember { group: GroupId, member: MemberId },

    /// The operation needs the group in a different state.
    #[error("group {group} is {actual}, operation requires {required}")]
    InvalidState {
        group: GroupId,
        actual: GroupState,
        required: GroupState,
    },

    /// `members` have no published public key, so nothing can be wrapped for
    /// them.
    #[error("members without a public key: {0:?}")]
    MissingPublicKeys(Vec<MemberId>),

    /// The admin holds fewer valid shares than the threshold.
    #[error("insufficient shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    /// The reconstructed master key did not authenticate the stored master
    /// list. The group stays in recovery.
    #[error("recovery failed: reconstructed key does not open the master list")]
    RecoveryFailed,

    /// Another finalize is still running on this coordinator.
    #[error("a recovery finalize is already in progress")]
    FinalizeInProgress,

    /// No envelope is stored for this member in this group.
    #[error("no assignment envelope for {member} in group {group}")]
    NoEnvelope { group: GroupId, member: MemberId },

    /// The envelope authenticated but does not hold a valid member id.
    #[error("assignment envelope for {member} in group {group} is malformed")]
    MalformedEnvelope { group: GroupId, member: MemberId },

    /// Local custody has no key and no backup could restore one.
    #[error("no private key available on this device for {0}")]
    NoLocalKey(MemberId),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Matching(#[from] MatchingError),

    #[error(transparent)]
    Sharing(#[from] ShamirError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Wrap(#[from] WrapError),

    #[error(transparent)]
    Kdf(#[from] KdfError),

    #[error(transparent)]
    Custody(#[from] CustodyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
