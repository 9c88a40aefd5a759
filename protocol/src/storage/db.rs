//! # SledStore — Persistent Group Storage
//!
//! A [`GroupStore`] backed by sled's embedded key-value store. This is what
//! the CLI runs against.
//!
//! ## Tree Layout
//!
//! | Tree              | Key                       | Value                                   |
//! |-------------------|---------------------------|-----------------------------------------|
//! | `groups`          | `group_id`                | `bincode(Group)`                        |
//! | `profiles`        | `member_id`               | `bincode(MemberProfile)`                |
//! | `envelopes`       | `group_id \0 member_id`   | `bincode(AssignmentEnvelope)`           |
//! | `shares`          | `group_id \0 member_id`   | wrapped share bytes                     |
//! | `master_lists`    | `group_id`                | encrypted master list bytes             |
//! | `recovered_lists` | `group_id`                | plaintext master list bytes             |
//! | `submissions`     | `group_id`                | `bincode(BTreeMap<MemberId, RecoverySubmission>)` |
//!
//! Submissions for a group live in a single value so that finalize can drop
//! them inside the same transaction that completes the group. sled's
//! transactional trees cannot range-scan.
//!
//! ## Atomicity
//!
//! `commit_assignment` and `finalize_recovery` run as multi-tree sled
//! transactions: the state check, the state change and every artifact land
//! together or not at all, and the database is flushed before returning.
//!
//! ## Notifications
//!
//! Subscriptions only see writes made through this `SledStore` instance.
//! Another process writing to the same directory will not wake them, and
//! sled's directory lock keeps a second process out while this one is open.
//! Cross-process watchers poll with a short-lived store instead.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::watch;
use tracing::debug;

use super::{
    not_found, revision_stream, AssignmentEnvelope, GroupStore, MatchingBundle, MemberProfile,
    RecoverySubmission, StoreError, StoreResult,
};
use crate::group::{Group, GroupId, GroupState, MemberId};

type Submissions = BTreeMap<MemberId, RecoverySubmission>;

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn member_key(group: &GroupId, member: &MemberId) -> Vec<u8> {
    let mut key = Vec::with_capacity(group.as_str().len() + member.as_str().len() + 1);
    key.extend_from_slice(group.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(member.as_str().as_bytes());
    key
}

fn abort<T>(err: StoreError) -> Result<T, ConflictableTransactionError<StoreError>> {
    Err(ConflictableTransactionError::Abort(err))
}

fn from_tx(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Sled(e),
    }
}

fn expect_state(group: &Group, expected: GroupState) -> StoreResult<()> {
    if group.state != expected {
        return Err(StoreError::Conflict(format!(
            "group {} is {}, expected {expected}",
            group.id, group.state
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// Persistent [`GroupStore`] over a sled database.
///
/// sled trees are cheap `Arc` handles; subscriptions clone them into their
/// reader closures.
pub struct SledStore {
    db: Db,
    groups: Tree,
    profiles: Tree,
    envelopes: Tree,
    shares: Tree,
    master_lists: Tree,
    recovered_lists: Tree,
    submissions: Tree,
    changes: watch::Sender<u64>,
}

impl SledStore {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A throwaway database removed when the store is dropped.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let (changes, _) = watch::channel(0);
        debug!(recovered = db.was_recovered(), "sled database opened");
        Ok(Self {
            groups: db.open_tree("groups")?,
            profiles: db.open_tree("profiles")?,
            envelopes: db.open_tree("envelopes")?,
            shares: db.open_tree("shares")?,
            master_lists: db.open_tree("master_lists")?,
            recovered_lists: db.open_tree("recovered_lists")?,
            submissions: db.open_tree("submissions")?,
            db,
            changes,
        })
    }

    fn bump(&self) {
        self.changes.send_modify(|rev| *rev += 1);
    }

    fn get_decoded<T: DeserializeOwned>(tree: &Tree, key: &[u8], what: &str) -> StoreResult<T> {
        match tree.get(key)? {
            Some(bytes) => decode(&bytes),
            None => Err(not_found(what, String::from_utf8_lossy(key).replace('\0', "/"))),
        }
    }

    fn get_raw(tree: &Tree, key: &[u8], what: &str) -> StoreResult<Vec<u8>> {
        tree.get(key)?
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| not_found(what, String::from_utf8_lossy(key).replace('\0', "/")))
    }

    fn read_submissions(tree: &Tree, id: &GroupId) -> StoreResult<Submissions> {
        match tree.get(id.as_str())? {
            Some(bytes) => decode(&bytes),
            None => Ok(Submissions::new()),
        }
    }
}

#[async_trait]
impl GroupStore for SledStore {
    async fn create_group(&self, group: &Group) -> StoreResult<()> {
        let bytes = encode(group)?;
        self.groups
            .compare_and_swap(group.id.as_str(), None as Option<&[u8]>, Some(bytes))?
            .map_err(|_| StoreError::Conflict(format!("group {} already exists", group.id)))?;
        self.bump();
        Ok(())
    }

    async fn update_group(&self, group: &Group) -> StoreResult<()> {
        let bytes = encode(group)?;
        let key = group.id.as_str();
        self.groups
            .transaction(|tx| {
                if tx.get(key)?.is_none() {
                    return abort(not_found("group", &group.id));
                }
                tx.insert(key, bytes.as_slice())?;
                Ok(())
            })
            .map_err(from_tx)?;
        self.bump();
        Ok(())
    }

    async fn get_group(&self, id: &GroupId) -> StoreResult<Group> {
        Self::get_decoded(&self.groups, id.as_str().as_bytes(), "group")
    }

    async fn list_groups(&self) -> StoreResult<Vec<Group>> {
        let mut groups = Vec::with_capacity(self.groups.len());
        for entry in self.groups.iter() {
            let (_key, value) = entry?;
            groups.push(decode::<Group>(&value)?);
        }
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(groups)
    }

    async fn set_group_state(
        &self,
        id: &GroupId,
        from: GroupState,
        to: GroupState,
    ) -> StoreResult<()> {
        let key = id.as_str();
        self.groups
            .transaction(|tx| {
                let Some(bytes) = tx.get(key)? else {
                    return abort(not_found("group", id));
                };
                let mut group: Group = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                expect_state(&group, from).map_err(ConflictableTransactionError::Abort)?;
                group
                    .transition(to)
                    .map_err(|e| ConflictableTransactionError::Abort(StoreError::Conflict(e.to_string())))?;
                tx.insert(key, encode(&group).map_err(ConflictableTransactionError::Abort)?)?;
                Ok(())
            })
            .map_err(from_tx)?;
        self.bump();
        Ok(())
    }

    fn watch_group(&self, id: &GroupId) -> BoxStream<'static, Group> {
        let groups = self.groups.clone();
        let key = id.as_str().to_owned();
        revision_stream(self.changes.subscribe(), move || {
            let bytes = groups.get(&key).ok().flatten()?;
            decode(&bytes).ok()
        })
    }

    async fn put_member_profile(&self, profile: &MemberProfile) -> StoreResult<()> {
        self.profiles.insert(profile.id.as_str(), encode(profile)?)?;
        self.bump();
        Ok(())
    }

    async fn get_member_profile(&self, id: &MemberId) -> StoreResult<MemberProfile> {
        Self::get_decoded(&self.profiles, id.as_str().as_bytes(), "member")
    }

    async fn commit_assignment(&self, id: &GroupId, bundle: MatchingBundle) -> StoreResult<()> {
        let key = id.as_str();

        let mut envelopes = Vec::with_capacity(bundle.envelopes.len());
        for envelope in &bundle.envelopes {
            envelopes.push((member_key(id, &envelope.giver), encode(envelope)?));
        }
        let shares: Vec<(Vec<u8>, &[u8])> = bundle
            .shares
            .iter()
            .map(|s| (member_key(id, &s.member), s.wrapped_share.as_slice()))
            .collect();

        (&self.groups, &self.envelopes, &self.shares, &self.master_lists)
            .transaction(|(groups, envelope_tree, share_tree, master_lists)| {
                let Some(bytes) = groups.get(key)? else {
                    return abort(not_found("group", id));
                };
                let mut group: Group = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                expect_state(&group, GroupState::Pending).map_err(ConflictableTransactionError::Abort)?;
                group
                    .transition(GroupState::Assigned)
                    .map_err(|e| ConflictableTransactionError::Abort(StoreError::Conflict(e.to_string())))?;

                for (k, v) in &envelopes {
                    envelope_tree.insert(k.as_slice(), v.as_slice())?;
                }
                for (k, v) in &shares {
                    share_tree.insert(k.as_slice(), *v)?;
                }
                master_lists.insert(key, bundle.encrypted_master_list.as_slice())?;
                groups.insert(key, encode(&group).map_err(ConflictableTransactionError::Abort)?)?;
                Ok(())
            })
            .map_err(from_tx)?;

        self.db.flush_async().await?;
        self.bump();
        debug!(
            group_id = %id,
            envelopes = bundle.envelopes.len(),
            shares = bundle.shares.len(),
            "assignment committed"
        );
        Ok(())
    }

    async fn get_assignment_envelope(
        &self,
        id: &GroupId,
        member: &MemberId,
    ) -> StoreResult<AssignmentEnvelope> {
        Self::get_decoded(&self.envelopes, &member_key(id, member), "envelope")
    }

    async fn get_share(&self, id: &GroupId, member: &MemberId) -> StoreResult<Vec<u8>> {
        Self::get_raw(&self.shares, &member_key(id, member), "share")
    }

    async fn get_encrypted_master_list(&self, id: &GroupId) -> StoreResult<Vec<u8>> {
        Self::get_raw(&self.master_lists, id.as_str().as_bytes(), "master list")
    }

    async fn submit_recovery_share(
        &self,
        id: &GroupId,
        submission: RecoverySubmission,
    ) -> StoreResult<()> {
        let key = id.as_str();
        (&self.groups, &self.submissions)
            .transaction(|(groups, tx)| {
                let Some(bytes) = groups.get(key)? else {
                    return abort(not_found("group", id));
                };
                let group: Group = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                expect_state(&group, GroupState::Recovery).map_err(ConflictableTransactionError::Abort)?;

                let mut current: Submissions = match tx.get(key)? {
                    Some(bytes) => decode(&bytes).map_err(ConflictableTransactionError::Abort)?,
                    None => Submissions::new(),
                };
                current.insert(submission.member.clone(), submission.clone());
                tx.insert(key, encode(&current).map_err(ConflictableTransactionError::Abort)?)?;
                Ok(())
            })
            .map_err(from_tx)?;
        self.bump();
        Ok(())
    }

    async fn recovery_submissions(&self, id: &GroupId) -> StoreResult<Vec<RecoverySubmission>> {
        Ok(Self::read_submissions(&self.submissions, id)?
            .into_values()
            .collect())
    }

    fn subscribe_recovery_submissions(
        &self,
        id: &GroupId,
    ) -> BoxStream<'static, Vec<RecoverySubmission>> {
        let tree = self.submissions.clone();
        let id = id.clone();
        revision_stream(self.changes.subscribe(), move || {
            Self::read_submissions(&tree, &id)
                .ok()
                .map(|subs| subs.into_values().collect())
        })
    }

    async fn finalize_recovery(&self, id: &GroupId, master_list: Vec<u8>) -> StoreResult<()> {
        let key = id.as_str();
        (&self.groups, &self.recovered_lists, &self.submissions)
            .transaction(|(groups, recovered, submissions)| {
                let Some(bytes) = groups.get(key)? else {
                    return abort(not_found("group", id));
                };
                let mut group: Group = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                expect_state(&group, GroupState::Recovery).map_err(ConflictableTransactionError::Abort)?;
                group
                    .transition(GroupState::Completed)
                    .map_err(|e| ConflictableTransactionError::Abort(StoreError::Conflict(e.to_string())))?;

                recovered.insert(key, master_list.as_slice())?;
                submissions.remove(key)?;
                groups.insert(key, encode(&group).map_err(ConflictableTransactionError::Abort)?)?;
                Ok(())
            })
            .map_err(from_tx)?;

        self.db.flush_async().await?;
        self.bump();
        debug!(group_id = %id, "recovery finalized, submissions cleared");
        Ok(())
    }

    async fn get_decrypted_master_list(&self, id: &GroupId) -> StoreResult<Vec<u8>> {
        Self::get_raw(&self.recovered_lists, id.as_str().as_bytes(), "recovered master list")
    }
}
