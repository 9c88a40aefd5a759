//! Walkthrough of a full Santa protocol round.
//!
//! Five friends enroll, form a group with one forced pairing, draw the
//! assignment, and each read their own envelope. Later the organizer runs
//! recovery: shares trickle in, an early finalize is refused, and the full
//! list comes back once a majority has answered.
//!
//! Run with:
//!   cargo run --example demo --release

use std::sync::Arc;
use std::time::Instant;

use santa_protocol::crypto::kdf::KdfParams;
use santa_protocol::{
    GroupCoordinator, GroupStore, MemberId, MemoryStore, ProtocolConfig, ProtocolError,
    SoftwareCustody, StaticIdentity,
};

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

fn step(n: u32, title: &str) {
    println!();
    println!("{BOLD}{CYAN}[{n}] {title}{RESET}");
}

fn detail(label: &str, value: impl std::fmt::Display) {
    println!("    {DIM}{label:<16}{RESET} {value}");
}

#[tokio::main]
async fn main() -> Result<(), ProtocolError> {
    let started = Instant::now();
    println!("{BOLD}Santa Protocol demo{RESET}  {DIM}GF(256) Shamir + X25519 + AES-256-GCM{RESET}");

    let store: Arc<dyn GroupStore> = Arc::new(MemoryStore::new());
    // Cheap scrypt so the demo starts instantly. Never use these in practice.
    let config = ProtocolConfig {
        kdf: KdfParams { log_n: 10, r: 8, p: 1 },
        ..ProtocolConfig::default()
    };

    let names = ["ana", "bruno", "carla", "diego", "eva"];
    let people: Vec<(MemberId, GroupCoordinator)> = names
        .iter()
        .map(|name| {
            let coordinator = GroupCoordinator::new(
                Arc::clone(&store),
                Arc::new(SoftwareCustody::new()),
                Arc::new(StaticIdentity::signed_in(*name)),
                config.clone(),
            );
            (MemberId::from(*name), coordinator)
        })
        .collect();
    let admin = &people[0].1;

    step(1, "Enrollment");
    for (id, coordinator) in &people {
        let profile = coordinator.enroll(&format!("{id} likes cookies")).await?;
        detail(id.as_str(), &profile.public_key.to_hex()[..16]);
    }

    step(2, "Group formation");
    let group = admin.create_group("family exchange").await?;
    for (_, coordinator) in &people[1..] {
        coordinator.join_group(&group.id).await?;
    }
    admin
        .add_rule(&group.id, MemberId::from("bruno"), MemberId::from("carla"))
        .await?;
    let group = admin.group(&group.id).await?;
    detail("group", &group.id);
    detail("members", group.members.len());
    detail("threshold", group.threshold());
    detail("rule", "bruno -> carla");

    step(3, "Matching");
    admin.start_matching(&group.id).await?;
    detail("state", admin.group(&group.id).await?.state);
    for (id, coordinator) in &people {
        let receiver = coordinator.view_assignment(&group.id).await?;
        println!("    {GREEN}{id}{RESET} opens their envelope: {BOLD}{receiver}{RESET}");
    }

    step(4, "Recovery");
    admin.initiate_recovery(&group.id).await?;
    people[3].1.submit_recovery_share(&group.id).await?;
    let progress = admin.recovery_progress(&group.id).await?;
    detail("collected", format!("{}/{}", progress.collected, progress.threshold));

    match admin.finalize_recovery(&group.id).await {
        Err(e) => println!("    {RED}early finalize refused:{RESET} {e}"),
        Ok(_) => println!("    {YELLOW}unexpected early success{RESET}"),
    }

    people[4].1.submit_recovery_share(&group.id).await?;
    let progress = admin.recovery_progress(&group.id).await?;
    detail("collected", format!("{}/{}", progress.collected, progress.threshold));

    let assignment = admin.finalize_recovery(&group.id).await?;
    println!("    {GREEN}master list recovered:{RESET}");
    for (giver, receiver) in assignment.iter() {
        println!("      {giver} -> {receiver}");
    }
    detail("state", admin.group(&group.id).await?.state);

    println!();
    println!("{DIM}done in {:.2?}{RESET}", started.elapsed());
    Ok(())
}
