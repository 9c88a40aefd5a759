//! The [`GroupCoordinator`]: one signed-in member's handle on the protocol.

use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::error::{ProtocolError, ProtocolResult};
use crate::config::ProtocolConfig;
use crate::crypto::encryption::{self, SymmetricKey};
use crate::crypto::shamir::{self, ShamirConfig, Share};
use crate::crypto::wrap::{self, MemberPublicKey};
use crate::custody::KeyCustody;
use crate::group::matching::{self, Assignment};
use crate::group::{Group, GroupId, GroupState, MemberId, Rule};
use crate::identity::IdentityProvider;
use crate::storage::{
    AssignmentEnvelope, GroupStore, MatchingBundle, MemberProfile, RecoverySubmission, StoreError,
    WrappedShare,
};

/// Share-collection progress as the admin sees it.
///
/// `collected` includes the admin's own share, which never needs to be
/// submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryProgress {
    pub collected: usize,
    pub threshold: usize,
}

impl RecoveryProgress {
    fn from_submissions(submissions: &[RecoverySubmission], admin: &MemberId, threshold: usize) -> Self {
        let others = submissions.iter().filter(|s| &s.member != admin).count();
        Self {
            collected: others + 1,
            threshold,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.collected >= self.threshold
    }
}

/// Drives the group state machine on behalf of the signed-in member.
///
/// All collaborators are injected. The coordinator holds no protocol state of
/// its own apart from the finalize guard: the master key and the plaintext
/// master list only ever live on the stack of `start_matching` and
/// `finalize_recovery`.
pub struct GroupCoordinator {
    store: Arc<dyn GroupStore>,
    custody: Arc<dyn KeyCustody>,
    identity: Arc<dyn IdentityProvider>,
    config: ProtocolConfig,
    finalize_guard: Mutex<()>,
}

impl GroupCoordinator {
    pub fn new(
        store: Arc<dyn GroupStore>,
        custody: Arc<dyn KeyCustody>,
        identity: Arc<dyn IdentityProvider>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            store,
            custody,
            identity,
            config,
            finalize_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    fn me(&self) -> ProtocolResult<MemberId> {
        self.identity.current_member().ok_or(ProtocolError::NotSignedIn)
    }

    async fn load_as_admin(&self, id: &GroupId) -> ProtocolResult<(MemberId, Group)> {
        let me = self.me()?;
        let group = self.store.get_group(id).await?;
        if !group.is_admin(&me) {
            return Err(ProtocolError::NotAdmin {
                group: id.clone(),
                member: me,
            });
        }
        Ok((me, group))
    }

    async fn load_as_member(&self, id: &GroupId) -> ProtocolResult<(MemberId, Group)> {
        let me = self.me()?;
        let group = self.store.get_group(id).await?;
        if !group.is_member(&me) {
            return Err(ProtocolError::NotAMember {
                group: id.clone(),
                member: me,
            });
        }
        Ok((me, group))
    }

    async fn ensure_local_key(&self, me: &MemberId) -> ProtocolResult<()> {
        if !self.custody.has_local_private_key().await {
            return Err(ProtocolError::NoLocalKey(me.clone()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Enrollment
    // -----------------------------------------------------------------------

    /// Publish a profile for the signed-in member.
    ///
    /// Uses the key already in custody if there is one, otherwise generates
    /// a new pair. The private key is exported sealed under `password` and
    /// stored with the profile so another device can restore it.
    pub async fn enroll(&self, password: &str) -> ProtocolResult<MemberProfile> {
        let me = self.me()?;
        match self.store.get_member_profile(&me).await {
            Ok(_) => return Err(ProtocolError::AlreadyEnrolled(me)),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let public_key = if self.custody.has_local_private_key().await {
            self.custody.public_key().await?
        } else {
            self.custody.generate_and_store_key_pair().await?
        };
        let backup = self
            .custody
            .export_private_key_encrypted_with_password(password, &self.config.kdf)
            .await?;

        let profile = MemberProfile {
            id: me.clone(),
            public_key,
            key_backup: Some(backup),
        };
        self.store.put_member_profile(&profile).await?;
        info!(member = %me, "member enrolled");
        Ok(profile)
    }

    /// Bring the member's private key into local custody from their password
    /// backup. Does nothing if custody already holds a key.
    pub async fn restore_key(&self, password: &str) -> ProtocolResult<MemberPublicKey> {
        let me = self.me()?;
        if self.custody.has_local_private_key().await {
            return Ok(self.custody.public_key().await?);
        }

        let profile = self.store.get_member_profile(&me).await?;
        let backup = profile
            .key_backup
            .as_ref()
            .ok_or_else(|| ProtocolError::NoLocalKey(me.clone()))?;
        let public_key = self
            .custody
            .import_private_key_from_password_backup(password, backup)
            .await?;
        if public_key != profile.public_key {
            warn!(member = %me, "restored key does not match published profile");
            return Err(wrap::WrapError::InvalidKey.into());
        }
        debug!(member = %me, "private key restored from backup");
        Ok(public_key)
    }

    // -----------------------------------------------------------------------
    // Group glue
    // -----------------------------------------------------------------------

    pub async fn create_group(&self, name: &str) -> ProtocolResult<Group> {
        let me = self.me()?;
        let group = Group::new(GroupId::random(), name, me.clone());
        self.store.create_group(&group).await?;
        info!(group_id = %group.id, admin = %me, "group created");
        Ok(group)
    }

    pub async fn join_group(&self, id: &GroupId) -> ProtocolResult<Group> {
        let me = self.me()?;
        let mut group = self.store.get_group(id).await?;
        group.add_member(me.clone())?;
        self.store.update_group(&group).await?;
        info!(group_id = %id, member = %me, members = group.members.len(), "member joined");
        Ok(group)
    }

    /// Force `giver` to draw `receiver`. Admin only, pending groups only.
    pub async fn add_rule(
        &self,
        id: &GroupId,
        giver: MemberId,
        receiver: MemberId,
    ) -> ProtocolResult<Group> {
        let (_, mut group) = self.load_as_admin(id).await?;
        group.add_rule(Rule { giver, receiver })?;
        self.store.update_group(&group).await?;
        debug!(group_id = %id, rules = group.rules.len(), "rule added");
        Ok(group)
    }

    pub async fn group(&self, id: &GroupId) -> ProtocolResult<Group> {
        Ok(self.store.get_group(id).await?)
    }

    pub async fn list_groups(&self) -> ProtocolResult<Vec<Group>> {
        Ok(self.store.list_groups().await?)
    }

    pub fn watch_group(&self, id: &GroupId) -> BoxStream<'static, Group> {
        self.store.watch_group(id)
    }

    // -----------------------------------------------------------------------
    // pending -> assigned
    // -----------------------------------------------------------------------

    /// Run matching and hand every encrypted artifact to storage in one
    /// atomic write.
    ///
    /// Nothing is stored on failure. On success the plaintext assignment and
    /// the master key have already been dropped when this returns.
    pub async fn start_matching(&self, id: &GroupId) -> ProtocolResult<()> {
        let (_, group) = self.load_as_admin(id).await?;
        if group.state != GroupState::Pending {
            return Err(ProtocolError::InvalidState {
                group: id.clone(),
                actual: group.state,
                required: GroupState::Pending,
            });
        }

        let keys = self.collect_public_keys(&group).await?;
        let bundle = build_matching_bundle(&group, &keys, &self.config)?;

        self.store.commit_assignment(id, bundle).await?;
        info!(
            group_id = %id,
            members = group.members.len(),
            threshold = group.threshold(),
            "matching committed"
        );
        Ok(())
    }

    async fn collect_public_keys(&self, group: &Group) -> ProtocolResult<Vec<MemberPublicKey>> {
        let mut keys = Vec::with_capacity(group.members.len());
        let mut missing = Vec::new();
        for member in &group.members {
            match self.store.get_member_public_key(member).await {
                Ok(key) => keys.push(key),
                Err(StoreError::NotFound(_)) => missing.push(member.clone()),
                Err(e) => return Err(e.into()),
            }
        }
        if !missing.is_empty() {
            return Err(ProtocolError::MissingPublicKeys(missing));
        }
        Ok(keys)
    }

    // -----------------------------------------------------------------------
    // Viewing one's own assignment
    // -----------------------------------------------------------------------

    /// Open the signed-in member's envelope and return who they give to.
    ///
    /// Works in any state after `pending`; needs no one else's cooperation.
    pub async fn view_assignment(&self, id: &GroupId) -> ProtocolResult<MemberId> {
        let (me, group) = self.load_as_member(id).await?;
        if group.state == GroupState::Pending {
            return Err(ProtocolError::InvalidState {
                group: id.clone(),
                actual: group.state,
                required: GroupState::Assigned,
            });
        }
        self.ensure_local_key(&me).await?;

        let envelope = match self.store.get_assignment_envelope(id, &me).await {
            Ok(envelope) => envelope,
            Err(StoreError::NotFound(_)) => {
                return Err(ProtocolError::NoEnvelope {
                    group: id.clone(),
                    member: me,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let key_bytes = self
            .custody
            .unwrap_with_local_private_key(&envelope.wrapped_key)
            .await?;
        let key = SymmetricKey::from_slice(&key_bytes)?;
        let receiver = encryption::decrypt(&key, &envelope.encrypted_receiver)?;
        let receiver = String::from_utf8(receiver).map_err(|_| ProtocolError::MalformedEnvelope {
            group: id.clone(),
            member: me,
        })?;
        Ok(MemberId::new(receiver))
    }

    // -----------------------------------------------------------------------
    // assigned -> recovery -> completed
    // -----------------------------------------------------------------------

    /// Open a recovery episode. Admin only.
    pub async fn initiate_recovery(&self, id: &GroupId) -> ProtocolResult<()> {
        let (_, group) = self.load_as_admin(id).await?;
        if group.state != GroupState::Assigned {
            return Err(ProtocolError::InvalidState {
                group: id.clone(),
                actual: group.state,
                required: GroupState::Assigned,
            });
        }
        self.store
            .set_group_state(id, GroupState::Assigned, GroupState::Recovery)
            .await?;
        info!(group_id = %id, threshold = group.threshold(), "recovery initiated");
        Ok(())
    }

    /// Unwrap our own share and re-wrap it for the admin.
    pub async fn submit_recovery_share(&self, id: &GroupId) -> ProtocolResult<()> {
        let (me, group) = self.load_as_member(id).await?;
        if group.state != GroupState::Recovery {
            return Err(ProtocolError::InvalidState {
                group: id.clone(),
                actual: group.state,
                required: GroupState::Recovery,
            });
        }
        self.ensure_local_key(&me).await?;

        let wrapped = self.store.get_share(id, &me).await?;
        let share = self.custody.unwrap_with_local_private_key(&wrapped).await?;
        let admin_key = self.store.get_member_public_key(&group.admin).await?;
        let wrapped_for_admin = wrap::wrap_for_member(&share, &admin_key)?;

        self.store
            .submit_recovery_share(
                id,
                RecoverySubmission {
                    member: me.clone(),
                    wrapped_for_admin,
                    submitted_at: Utc::now(),
                },
            )
            .await?;
        info!(group_id = %id, member = %me, "recovery share submitted");
        Ok(())
    }

    pub async fn recovery_progress(&self, id: &GroupId) -> ProtocolResult<RecoveryProgress> {
        let group = self.store.get_group(id).await?;
        let submissions = self.store.recovery_submissions(id).await?;
        Ok(RecoveryProgress::from_submissions(
            &submissions,
            &group.admin,
            group.threshold(),
        ))
    }

    /// Live progress, one item per change in the submission set.
    pub async fn watch_recovery_progress(
        &self,
        id: &GroupId,
    ) -> ProtocolResult<BoxStream<'static, RecoveryProgress>> {
        let group = self.store.get_group(id).await?;
        let threshold = group.threshold();
        let admin = group.admin;
        Ok(self
            .store
            .subscribe_recovery_submissions(id)
            .map(move |subs| RecoveryProgress::from_submissions(&subs, &admin, threshold))
            .boxed())
    }

    /// Reconstruct the master key, decrypt the master list, store it and
    /// complete the group. Admin only.
    ///
    /// Submissions that fail to unwrap or parse are skipped with a warning.
    /// If the remaining shares are fewer than the threshold this fails with
    /// `InsufficientShares`; if they reconstruct a key that does not open the
    /// master list it fails with `RecoveryFailed`. Either way the group stays
    /// in `recovery`.
    ///
    /// Only one finalize may run at a time per coordinator; a concurrent call
    /// fails immediately with `FinalizeInProgress`.
    pub async fn finalize_recovery(&self, id: &GroupId) -> ProtocolResult<Assignment> {
        let _guard = self
            .finalize_guard
            .try_lock()
            .map_err(|_| ProtocolError::FinalizeInProgress)?;

        let (me, group) = self.load_as_admin(id).await?;
        if group.state != GroupState::Recovery {
            return Err(ProtocolError::InvalidState {
                group: id.clone(),
                actual: group.state,
                required: GroupState::Recovery,
            });
        }
        self.ensure_local_key(&me).await?;
        let threshold = group.threshold();

        let shares = self.gather_shares(&group, &me).await?;
        if shares.len() < threshold {
            warn!(group_id = %id, have = shares.len(), need = threshold, "not enough shares to finalize");
            return Err(ProtocolError::InsufficientShares {
                have: shares.len(),
                need: threshold,
            });
        }

        let master_key_bytes = Zeroizing::new(shamir::combine_with_threshold(&shares, threshold)?);
        let master_key =
            SymmetricKey::from_slice(&master_key_bytes).map_err(|_| ProtocolError::RecoveryFailed)?;

        let encrypted = self.store.get_encrypted_master_list(id).await?;
        let plaintext = match encryption::decrypt(&master_key, &encrypted) {
            Ok(plaintext) => Zeroizing::new(plaintext),
            Err(_) => {
                warn!(group_id = %id, shares = shares.len(), "reconstructed key rejected by master list");
                return Err(ProtocolError::RecoveryFailed);
            }
        };
        drop(master_key);

        let assignment =
            Assignment::from_master_list(&plaintext).map_err(|_| ProtocolError::RecoveryFailed)?;
        self.store.finalize_recovery(id, plaintext.to_vec()).await?;

        info!(group_id = %id, shares = shares.len(), threshold, "recovery completed");
        Ok(assignment)
    }

    /// The admin's own share plus every usable submission, one per index.
    async fn gather_shares(&self, group: &Group, admin: &MemberId) -> ProtocolResult<Vec<Share>> {
        let submissions = self.store.recovery_submissions(&group.id).await?;

        let own_wrapped = self.store.get_share(&group.id, admin).await?;
        let own = self.custody.unwrap_with_local_private_key(&own_wrapped).await?;

        let mut shares = vec![Share::from_bytes(&own)?];
        let mut seen: HashSet<u8> = shares.iter().map(|s| s.index).collect();

        for submission in &submissions {
            let Some(position) = group.members.iter().position(|m| m == &submission.member) else {
                warn!(group_id = %group.id, member = %submission.member, "submission from non-member ignored");
                continue;
            };

            let bytes = match self
                .custody
                .unwrap_with_local_private_key(&submission.wrapped_for_admin)
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(group_id = %group.id, member = %submission.member, error = %e, "skipping undecryptable submission");
                    continue;
                }
            };

            let share = match Share::from_bytes(&bytes) {
                Ok(share) if share.index as usize == position + 1 => share,
                _ => {
                    warn!(group_id = %group.id, member = %submission.member, "skipping malformed submission");
                    continue;
                }
            };

            if seen.insert(share.index) {
                shares.push(share);
            }
        }

        debug!(group_id = %group.id, submissions = submissions.len(), usable = shares.len(), "shares gathered");
        Ok(shares)
    }

    /// The recovered master list of a completed group. Admin only.
    pub async fn completed_master_list(&self, id: &GroupId) -> ProtocolResult<Assignment> {
        let (_, group) = self.load_as_admin(id).await?;
        if group.state != GroupState::Completed {
            return Err(ProtocolError::InvalidState {
                group: id.clone(),
                actual: group.state,
                required: GroupState::Completed,
            });
        }
        let plaintext = Zeroizing::new(self.store.get_decrypted_master_list(id).await?);
        Ok(Assignment::from_master_list(&plaintext)?)
    }
}

/// Everything `start_matching` computes, with no I/O. `keys[i]` belongs to
/// `group.members[i]`.
fn build_matching_bundle(
    group: &Group,
    keys: &[MemberPublicKey],
    config: &ProtocolConfig,
) -> ProtocolResult<MatchingBundle> {
    let assignment =
        matching::compute_assignment(&group.members, &group.rules, config.max_matching_attempts)?;

    let master_key = SymmetricKey::generate();
    let master_list = Zeroizing::new(assignment.to_master_list()?);
    let encrypted_master_list = encryption::encrypt(&master_key, &master_list)?;

    let sharing = ShamirConfig::majority(group.members.len())?;
    let shares = shamir::split_secret(master_key.as_bytes(), &sharing)?;
    drop(master_key);

    let mut wrapped_shares = Vec::with_capacity(shares.len());
    for ((member, key), share) in group.members.iter().zip(keys).zip(&shares) {
        let bytes = Zeroizing::new(share.to_bytes());
        wrapped_shares.push(WrappedShare {
            member: member.clone(),
            wrapped_share: wrap::wrap_for_member(&bytes, key)?,
        });
    }

    let mut envelopes = Vec::with_capacity(assignment.len());
    for (member, key) in group.members.iter().zip(keys) {
        let Some(receiver) = assignment.receiver_for(member) else {
            continue;
        };
        let envelope_key = SymmetricKey::generate();
        envelopes.push(AssignmentEnvelope {
            giver: member.clone(),
            encrypted_receiver: encryption::encrypt(&envelope_key, receiver.as_str().as_bytes())?,
            wrapped_key: wrap::wrap_for_member(envelope_key.as_bytes(), key)?,
        });
    }

    Ok(MatchingBundle {
        envelopes,
        shares: wrapped_shares,
        encrypted_master_list,
    })
}
