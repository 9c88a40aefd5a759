//! Identity provider contract: who is signed in on this client.
//!
//! Authentication itself happens elsewhere. The protocol only needs a stable
//! [`MemberId`] for the current session, or nothing if nobody is signed in.

use parking_lot::RwLock;

use crate::group::MemberId;

pub trait IdentityProvider: Send + Sync {
    fn current_member(&self) -> Option<MemberId>;
}

/// An identity set explicitly by the embedding application (the CLI's
/// `--member` flag, a test fixture).
#[derive(Debug, Default)]
pub struct StaticIdentity {
    member: RwLock<Option<MemberId>>,
}

impl StaticIdentity {
    pub fn signed_in(member: impl Into<MemberId>) -> Self {
        Self {
            member: RwLock::new(Some(member.into())),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, member: impl Into<MemberId>) {
        *self.member.write() = Some(member.into());
    }

    pub fn sign_out(&self) {
        self.member.write().take();
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_member(&self) -> Option<MemberId> {
        self.member.read().clone()
    }
}
