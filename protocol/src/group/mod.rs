//! # Groups, Members and the Group State Machine
//!
//! A [`Group`] is the unit everything else hangs off: a set of members, one
//! admin, optional forced-assignment [`Rule`]s and a [`GroupState`] that only
//! ever moves forward.
//!
//! ```text
//!   Pending ──start_matching──▶ Assigned ──initiate_recovery──▶ Recovery
//!                                   │                              │
//!                                   └──────────▶ Completed ◀───finalize
//! ```
//!
//! Membership and rules can only change while the group is `Pending`. Once
//! matching has run, the member list is baked into the share layout (share
//! `i` belongs to member `i`) and must never change again.

pub mod matching;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::majority_threshold;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: GroupState, to: GroupState },

    #[error("{0} is already a member")]
    AlreadyMember(MemberId),

    #[error("{0} is not a member of this group")]
    NotAMember(MemberId),

    #[error("group is {0}, membership and rules are frozen")]
    NotPending(GroupState),
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque, stable member identifier handed out by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for MemberId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Group identifier. Random UUIDv4 when created through the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// GroupState
// ---------------------------------------------------------------------------

/// Lifecycle state of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    /// Open for joining and rule edits. No assignment exists yet.
    Pending,
    /// Matching ran; envelopes, shares and the encrypted master list exist.
    Assigned,
    /// A member lost their key; the admin is collecting shares.
    Recovery,
    /// The master list has been recovered and stored in the clear.
    Completed,
}

impl GroupState {
    /// Whether `self -> next` is a legal forward step.
    ///
    /// `Assigned -> Completed` is allowed directly: a group that never needed
    /// recovery can simply be closed.
    pub fn can_transition_to(self, next: GroupState) -> bool {
        use GroupState::*;
        matches!(
            (self, next),
            (Pending, Assigned) | (Assigned, Recovery) | (Assigned, Completed) | (Recovery, Completed)
        )
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.pad("pending"),
            Self::Assigned => f.pad("assigned"),
            Self::Recovery => f.pad("recovery"),
            Self::Completed => f.pad("completed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A forced assignment: `giver` must draw `receiver`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub giver: MemberId,
    pub receiver: MemberId,
}

impl Rule {
    pub fn new(giver: impl Into<MemberId>, receiver: impl Into<MemberId>) -> Self {
        Self {
            giver: giver.into(),
            receiver: receiver.into(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.giver, self.receiver)
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A gift-exchange group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub admin: MemberId,
    /// Join order. After matching, share `i + 1` belongs to `members[i]`.
    pub members: Vec<MemberId>,
    pub rules: Vec<Rule>,
    pub state: GroupState,
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// New pending group with `admin` as its first member.
    pub fn new(id: GroupId, name: impl Into<String>, admin: MemberId) -> Self {
        Self {
            id,
            name: name.into(),
            members: vec![admin.clone()],
            admin,
            rules: Vec::new(),
            state: GroupState::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn is_member(&self, member: &MemberId) -> bool {
        self.members.contains(member)
    }

    pub fn is_admin(&self, member: &MemberId) -> bool {
        &self.admin == member
    }

    /// Majority threshold `floor(n / 2) + 1` for the current member count.
    pub fn threshold(&self) -> usize {
        majority_threshold(self.members.len())
    }

    pub fn add_member(&mut self, member: MemberId) -> Result<(), GroupError> {
        self.ensure_pending()?;
        if self.is_member(&member) {
            return Err(GroupError::AlreadyMember(member));
        }
        self.members.push(member);
        Ok(())
    }

    /// Add a forced assignment. Both ends must already be members.
    ///
    /// Consistency across rules (self-rules, two rules for one giver, ...) is
    /// checked by the matching engine, which reports it as `InvalidRule`.
    pub fn add_rule(&mut self, rule: Rule) -> Result<(), GroupError> {
        self.ensure_pending()?;
        for end in [&rule.giver, &rule.receiver] {
            if !self.is_member(end) {
                return Err(GroupError::NotAMember(end.clone()));
            }
        }
        if !self.rules.contains(&rule) {
            self.rules.push(rule);
        }
        Ok(())
    }

    /// Move to `next`, refusing anything but a forward step.
    pub fn transition(&mut self, next: GroupState) -> Result<(), GroupError> {
        if !self.state.can_transition_to(next) {
            return Err(GroupError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), GroupError> {
        if self.state != GroupState::Pending {
            return Err(GroupError::NotPending(self.state));
        }
        Ok(())
    }
}
