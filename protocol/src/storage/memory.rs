//! In-memory [`GroupStore`]. Everything lives behind one `RwLock`, which makes
//! the atomic writes trivially atomic.

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;

use super::{
    not_found, revision_stream, AssignmentEnvelope, GroupStore, MatchingBundle, MemberProfile,
    RecoverySubmission, StoreError, StoreResult,
};
use crate::group::{Group, GroupId, GroupState, MemberId};

type MemberKey = (GroupId, MemberId);

#[derive(Default)]
struct State {
    groups: HashMap<GroupId, Group>,
    profiles: HashMap<MemberId, MemberProfile>,
    envelopes: HashMap<MemberKey, AssignmentEnvelope>,
    shares: HashMap<MemberKey, Vec<u8>>,
    master_lists: HashMap<GroupId, Vec<u8>>,
    recovered_lists: HashMap<GroupId, Vec<u8>>,
    submissions: HashMap<GroupId, BTreeMap<MemberId, RecoverySubmission>>,
}

impl State {
    fn group_mut(&mut self, id: &GroupId) -> StoreResult<&mut Group> {
        self.groups.get_mut(id).ok_or_else(|| not_found("group", id))
    }
}

/// A [`GroupStore`] that keeps everything in process memory.
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    changes: watch::Sender<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            changes,
        }
    }

    fn bump(&self) {
        self.changes.send_modify(|rev| *rev += 1);
    }

    /// Apply `write` under the lock and notify subscribers if it succeeded.
    fn write<T>(&self, write: impl FnOnce(&mut State) -> StoreResult<T>) -> StoreResult<T> {
        let result = write(&mut self.state.write());
        if result.is_ok() {
            self.bump();
        }
        result
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn create_group(&self, group: &Group) -> StoreResult<()> {
        self.write(|s| {
            if s.groups.contains_key(&group.id) {
                return Err(StoreError::Conflict(format!("group {} already exists", group.id)));
            }
            s.groups.insert(group.id.clone(), group.clone());
            Ok(())
        })
    }

    async fn update_group(&self, group: &Group) -> StoreResult<()> {
        self.write(|s| {
            *s.group_mut(&group.id)? = group.clone();
            Ok(())
        })
    }

    async fn get_group(&self, id: &GroupId) -> StoreResult<Group> {
        self.state
            .read()
            .groups
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("group", id))
    }

    async fn list_groups(&self) -> StoreResult<Vec<Group>> {
        let mut groups: Vec<Group> = self.state.read().groups.values().cloned().collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(groups)
    }

    async fn set_group_state(
        &self,
        id: &GroupId,
        from: GroupState,
        to: GroupState,
    ) -> StoreResult<()> {
        self.write(|s| {
            let group = s.group_mut(id)?;
            if group.state != from {
                return Err(StoreError::Conflict(format!(
                    "group {id} is {}, expected {from}",
                    group.state
                )));
            }
            group
                .transition(to)
                .map_err(|e| StoreError::Conflict(e.to_string()))
        })
    }

    fn watch_group(&self, id: &GroupId) -> BoxStream<'static, Group> {
        let state = Arc::clone(&self.state);
        let id = id.clone();
        revision_stream(self.changes.subscribe(), move || {
            state.read().groups.get(&id).cloned()
        })
    }

    async fn put_member_profile(&self, profile: &MemberProfile) -> StoreResult<()> {
        self.write(|s| {
            s.profiles.insert(profile.id.clone(), profile.clone());
            Ok(())
        })
    }

    async fn get_member_profile(&self, id: &MemberId) -> StoreResult<MemberProfile> {
        self.state
            .read()
            .profiles
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("member", id))
    }

    async fn commit_assignment(&self, id: &GroupId, bundle: MatchingBundle) -> StoreResult<()> {
        self.write(|s| {
            let group = s.group_mut(id)?;
            if group.state != GroupState::Pending {
                return Err(StoreError::Conflict(format!(
                    "group {id} is {}, expected pending",
                    group.state
                )));
            }
            group
                .transition(GroupState::Assigned)
                .map_err(|e| StoreError::Conflict(e.to_string()))?;

            for envelope in bundle.envelopes {
                s.envelopes
                    .insert((id.clone(), envelope.giver.clone()), envelope);
            }
            for share in bundle.shares {
                s.shares
                    .insert((id.clone(), share.member), share.wrapped_share);
            }
            s.master_lists
                .insert(id.clone(), bundle.encrypted_master_list);
            Ok(())
        })
    }

    async fn get_assignment_envelope(
        &self,
        id: &GroupId,
        member: &MemberId,
    ) -> StoreResult<AssignmentEnvelope> {
        self.state
            .read()
            .envelopes
            .get(&(id.clone(), member.clone()))
            .cloned()
            .ok_or_else(|| not_found("envelope", format!("{id}/{member}")))
    }

    async fn get_share(&self, id: &GroupId, member: &MemberId) -> StoreResult<Vec<u8>> {
        self.state
            .read()
            .shares
            .get(&(id.clone(), member.clone()))
            .cloned()
            .ok_or_else(|| not_found("share", format!("{id}/{member}")))
    }

    async fn get_encrypted_master_list(&self, id: &GroupId) -> StoreResult<Vec<u8>> {
        self.state
            .read()
            .master_lists
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("master list", id))
    }

    async fn submit_recovery_share(
        &self,
        id: &GroupId,
        submission: RecoverySubmission,
    ) -> StoreResult<()> {
        self.write(|s| {
            let state = s.group_mut(id)?.state;
            if state != GroupState::Recovery {
                return Err(StoreError::Conflict(format!(
                    "group {id} is {state}, expected recovery"
                )));
            }
            s.submissions
                .entry(id.clone())
                .or_default()
                .insert(submission.member.clone(), submission);
            Ok(())
        })
    }

    async fn recovery_submissions(&self, id: &GroupId) -> StoreResult<Vec<RecoverySubmission>> {
        Ok(self
            .state
            .read()
            .submissions
            .get(id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    fn subscribe_recovery_submissions(
        &self,
        id: &GroupId,
    ) -> BoxStream<'static, Vec<RecoverySubmission>> {
        let state = Arc::clone(&self.state);
        let id = id.clone();
        revision_stream(self.changes.subscribe(), move || {
            Some(
                state
                    .read()
                    .submissions
                    .get(&id)
                    .map(|m| m.values().cloned().collect())
                    .unwrap_or_default(),
            )
        })
    }

    async fn finalize_recovery(&self, id: &GroupId, master_list: Vec<u8>) -> StoreResult<()> {
        self.write(|s| {
            let group = s.group_mut(id)?;
            if group.state != GroupState::Recovery {
                return Err(StoreError::Conflict(format!(
                    "group {id} is {}, expected recovery",
                    group.state
                )));
            }
            group
                .transition(GroupState::Completed)
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
            s.recovered_lists.insert(id.clone(), master_list);
            s.submissions.remove(id);
            Ok(())
        })
    }

    async fn get_decrypted_master_list(&self, id: &GroupId) -> StoreResult<Vec<u8>> {
        self.state
            .read()
            .recovered_lists
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("recovered master list", id))
    }
}
