//! End-to-end tests for the Santa protocol.
//!
//! Each test builds a small group of members who share one store but each
//! have their own custody and identity, exactly as separate devices would.
//! Every scenario runs against both the in-memory and the sled store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;

use santa_protocol::crypto::kdf::{KdfError, KdfParams};
use santa_protocol::crypto::shamir::Share;
use santa_protocol::crypto::wrap;
use santa_protocol::custody::CustodyError;
use santa_protocol::storage::{RecoverySubmission, StoreError};
use santa_protocol::{
    GroupCoordinator, GroupId, GroupState, GroupStore, KeyCustody, MemberId, MemoryStore,
    ProtocolConfig, ProtocolError, SledStore, SoftwareCustody, StaticIdentity,
};

const FAST: KdfParams = KdfParams {
    log_n: 8,
    r: 8,
    p: 1,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct Member {
    id: MemberId,
    custody: Arc<SoftwareCustody>,
    coordinator: GroupCoordinator,
}

impl Member {
    fn new(store: &Arc<dyn GroupStore>, name: &str) -> Self {
        let custody = Arc::new(SoftwareCustody::new());
        let config = ProtocolConfig {
            kdf: FAST,
            ..ProtocolConfig::default()
        };
        let coordinator = GroupCoordinator::new(
            Arc::clone(store),
            Arc::clone(&custody) as Arc<dyn KeyCustody>,
            Arc::new(StaticIdentity::signed_in(name)),
            config,
        );
        Self {
            id: MemberId::from(name),
            custody,
            coordinator,
        }
    }

    fn password(&self) -> String {
        format!("{}-password", self.id)
    }
}

fn memory_store() -> Arc<dyn GroupStore> {
    Arc::new(MemoryStore::new())
}

fn sled_store() -> Arc<dyn GroupStore> {
    Arc::new(SledStore::open_temporary().expect("temp db"))
}

/// Enrolls `n` members, has member 0 create a group, and everyone else join.
async fn setup_group(store: &Arc<dyn GroupStore>, n: usize) -> (Vec<Member>, GroupId) {
    let members: Vec<Member> = (0..n).map(|i| Member::new(store, &format!("m{i}"))).collect();
    for m in &members {
        m.coordinator.enroll(&m.password()).await.unwrap();
    }

    let group = members[0].coordinator.create_group("office party").await.unwrap();
    for m in &members[1..] {
        m.coordinator.join_group(&group.id).await.unwrap();
    }
    (members, group.id)
}

// ---------------------------------------------------------------------------
// 1. Matching and viewing
// ---------------------------------------------------------------------------

async fn matching_gives_everyone_a_private_envelope(store: Arc<dyn GroupStore>) {
    let (members, gid) = setup_group(&store, 6).await;
    let admin = &members[0];

    admin.coordinator.start_matching(&gid).await.unwrap();
    assert_eq!(store.get_group(&gid).await.unwrap().state, GroupState::Assigned);

    let mut receivers = HashSet::new();
    for m in &members {
        let receiver = m.coordinator.view_assignment(&gid).await.unwrap();
        assert_ne!(receiver, m.id, "{} drew themself", m.id);
        assert!(members.iter().any(|o| o.id == receiver));
        assert!(receivers.insert(receiver), "receiver drawn twice");
    }
    assert_eq!(receivers.len(), members.len());

    // Matching again is refused.
    assert!(matches!(
        admin.coordinator.start_matching(&gid).await,
        Err(ProtocolError::InvalidState {
            actual: GroupState::Assigned,
            ..
        })
    ));
}

#[tokio::test]
async fn matching_gives_everyone_a_private_envelope_memory() {
    matching_gives_everyone_a_private_envelope(memory_store()).await;
}

#[tokio::test]
async fn matching_gives_everyone_a_private_envelope_sled() {
    matching_gives_everyone_a_private_envelope(sled_store()).await;
}

async fn forced_rule_holds_end_to_end(store: Arc<dyn GroupStore>) {
    let (members, gid) = setup_group(&store, 3).await;
    let admin = &members[0];

    admin
        .coordinator
        .add_rule(&gid, members[1].id.clone(), members[2].id.clone())
        .await
        .unwrap();

    // Only the admin may add rules.
    assert!(matches!(
        members[1]
            .coordinator
            .add_rule(&gid, members[2].id.clone(), members[0].id.clone())
            .await,
        Err(ProtocolError::NotAdmin { .. })
    ));

    admin.coordinator.start_matching(&gid).await.unwrap();
    assert_eq!(
        members[1].coordinator.view_assignment(&gid).await.unwrap(),
        members[2].id
    );
}

#[tokio::test]
async fn forced_rule_holds_end_to_end_memory() {
    forced_rule_holds_end_to_end(memory_store()).await;
}

#[tokio::test]
async fn forced_rule_holds_end_to_end_sled() {
    forced_rule_holds_end_to_end(sled_store()).await;
}

#[tokio::test]
async fn matching_preconditions() {
    let store = memory_store();
    let (members, gid) = setup_group(&store, 3).await;

    // Not the admin.
    assert!(matches!(
        members[1].coordinator.start_matching(&gid).await,
        Err(ProtocolError::NotAdmin { .. })
    ));

    // Nothing to view yet.
    assert!(matches!(
        members[1].coordinator.view_assignment(&gid).await,
        Err(ProtocolError::InvalidState {
            actual: GroupState::Pending,
            ..
        })
    ));

    // A member who never enrolled has no public key.
    let stranger = Member::new(&store, "stranger");
    stranger.coordinator.join_group(&gid).await.unwrap();
    match members[0].coordinator.start_matching(&gid).await {
        Err(ProtocolError::MissingPublicKeys(missing)) => {
            assert_eq!(missing, vec![MemberId::from("stranger")]);
        }
        other => panic!("expected MissingPublicKeys, got {other:?}"),
    }
    assert_eq!(store.get_group(&gid).await.unwrap().state, GroupState::Pending);
}

#[tokio::test]
async fn single_member_group_cannot_match() {
    let store = memory_store();
    let (members, gid) = setup_group(&store, 1).await;
    assert!(matches!(
        members[0].coordinator.start_matching(&gid).await,
        Err(ProtocolError::Matching(_))
    ));
}

#[tokio::test]
async fn signed_out_caller_is_rejected() {
    let store = memory_store();
    let coordinator = GroupCoordinator::new(
        Arc::clone(&store),
        Arc::new(SoftwareCustody::new()),
        Arc::new(StaticIdentity::signed_out()),
        ProtocolConfig::default(),
    );
    assert!(matches!(
        coordinator.create_group("nobody's").await,
        Err(ProtocolError::NotSignedIn)
    ));
}

// ---------------------------------------------------------------------------
// 2. Key backup and device loss
// ---------------------------------------------------------------------------

async fn lost_device_restores_from_password(store: Arc<dyn GroupStore>) {
    let (members, gid) = setup_group(&store, 4).await;
    members[0].coordinator.start_matching(&gid).await.unwrap();

    let m = &members[2];
    let before = m.coordinator.view_assignment(&gid).await.unwrap();

    m.custody.forget_local_key();
    assert!(matches!(
        m.coordinator.view_assignment(&gid).await,
        Err(ProtocolError::NoLocalKey(_))
    ));

    assert!(matches!(
        m.coordinator.restore_key("not my password").await,
        Err(ProtocolError::Custody(CustodyError::Kdf(KdfError::WrongPassword)))
    ));

    m.coordinator.restore_key(&m.password()).await.unwrap();
    assert_eq!(m.coordinator.view_assignment(&gid).await.unwrap(), before);

    // Enrolling twice would orphan the wrapped shares.
    assert!(matches!(
        m.coordinator.enroll(&m.password()).await,
        Err(ProtocolError::AlreadyEnrolled(_))
    ));
}

#[tokio::test]
async fn lost_device_restores_from_password_memory() {
    lost_device_restores_from_password(memory_store()).await;
}

#[tokio::test]
async fn lost_device_restores_from_password_sled() {
    lost_device_restores_from_password(sled_store()).await;
}

// ---------------------------------------------------------------------------
// 3. Recovery: n = 7, k = 4
// ---------------------------------------------------------------------------

async fn recovery_needs_a_majority(store: Arc<dyn GroupStore>) {
    let (members, gid) = setup_group(&store, 7).await;
    let admin = &members[0];
    admin.coordinator.start_matching(&gid).await.unwrap();

    // What each member sees now is what recovery must reproduce.
    let mut expected = Vec::new();
    for m in &members {
        expected.push((m.id.clone(), m.coordinator.view_assignment(&gid).await.unwrap()));
    }

    // Only the admin opens recovery, and only from `assigned`.
    assert!(matches!(
        members[3].coordinator.initiate_recovery(&gid).await,
        Err(ProtocolError::NotAdmin { .. })
    ));
    assert!(matches!(
        members[3].coordinator.submit_recovery_share(&gid).await,
        Err(ProtocolError::InvalidState { .. })
    ));
    admin.coordinator.initiate_recovery(&gid).await.unwrap();

    let progress = admin.coordinator.recovery_progress(&gid).await.unwrap();
    assert_eq!((progress.collected, progress.threshold), (1, 4));

    // Three submissions, the admin's among them: three distinct shares.
    admin.coordinator.submit_recovery_share(&gid).await.unwrap();
    members[1].coordinator.submit_recovery_share(&gid).await.unwrap();
    members[2].coordinator.submit_recovery_share(&gid).await.unwrap();

    let progress = admin.coordinator.recovery_progress(&gid).await.unwrap();
    assert_eq!(progress.collected, 3);
    assert!(!progress.is_ready());

    assert!(matches!(
        admin.coordinator.finalize_recovery(&gid).await,
        Err(ProtocolError::InsufficientShares { have: 3, need: 4 })
    ));
    assert_eq!(store.get_group(&gid).await.unwrap().state, GroupState::Recovery);

    // Non-admins cannot finalize even with enough shares.
    members[3].coordinator.submit_recovery_share(&gid).await.unwrap();
    assert!(matches!(
        members[3].coordinator.finalize_recovery(&gid).await,
        Err(ProtocolError::NotAdmin { .. })
    ));

    // The fourth share completes the set.
    let assignment = admin.coordinator.finalize_recovery(&gid).await.unwrap();
    assert_eq!(assignment.len(), 7);
    for (giver, receiver) in &expected {
        assert_eq!(assignment.receiver_for(giver), Some(receiver));
    }

    assert_eq!(store.get_group(&gid).await.unwrap().state, GroupState::Completed);
    assert!(store.recovery_submissions(&gid).await.unwrap().is_empty());

    let read_back = admin.coordinator.completed_master_list(&gid).await.unwrap();
    assert_eq!(read_back, assignment);
    assert!(matches!(
        members[1].coordinator.completed_master_list(&gid).await,
        Err(ProtocolError::NotAdmin { .. })
    ));

    // Envelopes still open after completion.
    assert_eq!(
        members[5].coordinator.view_assignment(&gid).await.unwrap(),
        expected[5].1
    );

    // A second finalize finds nothing left to do.
    assert!(matches!(
        admin.coordinator.finalize_recovery(&gid).await,
        Err(ProtocolError::InvalidState {
            actual: GroupState::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn recovery_needs_a_majority_memory() {
    recovery_needs_a_majority(memory_store()).await;
}

#[tokio::test]
async fn recovery_needs_a_majority_sled() {
    recovery_needs_a_majority(sled_store()).await;
}

/// Submits `member`'s real share index with every y-byte flipped.
async fn submit_corrupted_share(store: &Arc<dyn GroupStore>, gid: &GroupId, admin: &Member, member: &Member) {
    let wrapped = store.get_share(gid, &member.id).await.unwrap();
    let bytes = member.custody.unwrap_with_local_private_key(&wrapped).await.unwrap();
    let mut share = Share::from_bytes(&bytes).unwrap();
    for y in share.data.iter_mut() {
        *y ^= 0x5a;
    }

    let admin_key = store.get_member_public_key(&admin.id).await.unwrap();
    store
        .submit_recovery_share(
            gid,
            RecoverySubmission {
                member: member.id.clone(),
                wrapped_for_admin: wrap::wrap_for_member(&share.to_bytes(), &admin_key).unwrap(),
                submitted_at: Utc::now(),
            },
        )
        .await
        .unwrap();
}

async fn corrupted_share_fails_and_keeps_recovery_open(store: Arc<dyn GroupStore>) {
    let (members, gid) = setup_group(&store, 3).await;
    let admin = &members[0];
    admin.coordinator.start_matching(&gid).await.unwrap();
    admin.coordinator.initiate_recovery(&gid).await.unwrap();

    // k = 2: the admin's share plus one tampered share reach the count but
    // reconstruct the wrong key.
    submit_corrupted_share(&store, &gid, admin, &members[1]).await;
    assert!(matches!(
        admin.coordinator.finalize_recovery(&gid).await,
        Err(ProtocolError::RecoveryFailed)
    ));
    assert_eq!(store.get_group(&gid).await.unwrap().state, GroupState::Recovery);
    assert!(matches!(
        store.get_decrypted_master_list(&gid).await,
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(store.recovery_submissions(&gid).await.unwrap().len(), 1);

    // A good resubmission replaces the bad one and recovery completes.
    members[1].coordinator.submit_recovery_share(&gid).await.unwrap();
    let assignment = admin.coordinator.finalize_recovery(&gid).await.unwrap();
    assert_eq!(assignment.len(), 3);
    assert_eq!(store.get_group(&gid).await.unwrap().state, GroupState::Completed);
}

#[tokio::test]
async fn corrupted_share_fails_and_keeps_recovery_open_memory() {
    corrupted_share_fails_and_keeps_recovery_open(memory_store()).await;
}

#[tokio::test]
async fn corrupted_share_fails_and_keeps_recovery_open_sled() {
    corrupted_share_fails_and_keeps_recovery_open(sled_store()).await;
}

#[tokio::test]
async fn recovery_without_admin_submission() {
    let store = memory_store();
    let (members, gid) = setup_group(&store, 5).await;
    let admin = &members[0];
    admin.coordinator.start_matching(&gid).await.unwrap();
    admin.coordinator.initiate_recovery(&gid).await.unwrap();

    // k = 3 for n = 5: the admin's own share plus two others.
    members[3].coordinator.submit_recovery_share(&gid).await.unwrap();
    members[4].coordinator.submit_recovery_share(&gid).await.unwrap();

    let assignment = admin.coordinator.finalize_recovery(&gid).await.unwrap();
    assert_eq!(assignment.len(), 5);
    assert_eq!(
        assignment.receiver_for(&members[4].id),
        Some(&members[4].coordinator.view_assignment(&gid).await.unwrap())
    );
}

#[tokio::test]
async fn resubmission_counts_once() {
    let store = memory_store();
    let (members, gid) = setup_group(&store, 5).await;
    let admin = &members[0];
    admin.coordinator.start_matching(&gid).await.unwrap();
    admin.coordinator.initiate_recovery(&gid).await.unwrap();

    members[1].coordinator.submit_recovery_share(&gid).await.unwrap();
    members[1].coordinator.submit_recovery_share(&gid).await.unwrap();

    assert_eq!(admin.coordinator.recovery_progress(&gid).await.unwrap().collected, 2);
    assert!(matches!(
        admin.coordinator.finalize_recovery(&gid).await,
        Err(ProtocolError::InsufficientShares { have: 2, need: 3 })
    ));
}

#[tokio::test]
async fn progress_stream_follows_submissions() {
    let store = memory_store();
    let (members, gid) = setup_group(&store, 5).await;
    let admin = &members[0];
    admin.coordinator.start_matching(&gid).await.unwrap();
    admin.coordinator.initiate_recovery(&gid).await.unwrap();

    let mut progress = admin.coordinator.watch_recovery_progress(&gid).await.unwrap();
    let first = progress.next().await.unwrap();
    assert_eq!((first.collected, first.threshold), (1, 3));

    members[1].coordinator.submit_recovery_share(&gid).await.unwrap();
    assert_eq!(progress.next().await.unwrap().collected, 2);

    members[2].coordinator.submit_recovery_share(&gid).await.unwrap();
    let ready = progress.next().await.unwrap();
    assert_eq!(ready.collected, 3);
    assert!(ready.is_ready());
}

#[tokio::test]
async fn double_finalize_completes_once() {
    let store = memory_store();
    let (members, gid) = setup_group(&store, 3).await;
    let admin = &members[0];
    admin.coordinator.start_matching(&gid).await.unwrap();
    admin.coordinator.initiate_recovery(&gid).await.unwrap();
    members[1].coordinator.submit_recovery_share(&gid).await.unwrap();

    let (a, b) = tokio::join!(
        admin.coordinator.finalize_recovery(&gid),
        admin.coordinator.finalize_recovery(&gid),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert_eq!(store.get_group(&gid).await.unwrap().state, GroupState::Completed);
}
