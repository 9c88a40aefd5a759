// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Santa CLI
//!
//! Entry point for the `santa` binary. Parses arguments, loads configuration,
//! initializes logging, opens the sled database in the data directory, and
//! runs one coordinator operation as the given member.
//!
//! Private keys never touch disk in the clear. Every invocation starts with
//! empty in-memory custody and restores the member's key from the
//! password-sealed backup stored in their profile.

mod cli;
mod config;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use santa_protocol::{
    Assignment, GroupCoordinator, GroupId, MemberId, RecoveryProgress, SledStore,
    SoftwareCustody, StaticIdentity,
};

use cli::{Commands, GlobalArgs, GroupCommand, RecoveryCommand, SantaCli};
use config::CliConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = SantaCli::parse();

    if let Commands::Version = cli.command {
        print_version();
        return Ok(());
    }

    let config = CliConfig::load(cli.global.config.as_deref())?;
    let level = cli.global.log_level.as_deref().unwrap_or(&config.log_level);
    logging::init_logging(level, config.log_format);

    // Following must not hold the database between polls.
    if let Commands::Recovery(RecoveryCommand::Status {
        group,
        follow: true,
        interval,
    }) = &cli.command
    {
        let id = GroupId::new(group.as_str());
        return follow_progress(&cli.global, &config, &id, Duration::from_secs(*interval)).await;
    }

    let session = Session::open(&cli.global, &config).await?;
    run(&session, cli.command).await
}

/// Print progress every time it changes until the threshold is met.
///
/// sled holds an exclusive lock on the database and only notifies writers in
/// the same process, so each poll opens the store, reads, and closes it again.
async fn follow_progress(
    global: &GlobalArgs,
    config: &CliConfig,
    id: &GroupId,
    interval: Duration,
) -> Result<()> {
    let mut last = None;
    loop {
        let progress = progress_snapshot(global, config, id).await?;
        if last != Some(progress) {
            println!("{}/{}", progress.collected, progress.threshold);
            last = Some(progress);
        }
        if progress.is_ready() {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

/// One progress read on a store that is closed again before returning.
async fn progress_snapshot(
    global: &GlobalArgs,
    config: &CliConfig,
    id: &GroupId,
) -> Result<RecoveryProgress> {
    let session = Session::open(global, config).await?;
    Ok(session.coordinator.recovery_progress(id).await?)
}

/// One invocation's worth of wiring: store, identity, custody, coordinator.
struct Session {
    coordinator: GroupCoordinator,
    password: Option<String>,
}

impl Session {
    async fn open(global: &GlobalArgs, config: &CliConfig) -> Result<Self> {
        let Some(member) = global.member.as_deref() else {
            bail!("--member (or SANTA_MEMBER) is required");
        };

        let db_path = global.data_dir.join("db");
        std::fs::create_dir_all(&db_path)
            .with_context(|| format!("failed to create data directory: {}", db_path.display()))?;
        let store = SledStore::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        tracing::debug!(path = %db_path.display(), member, "database opened");

        let coordinator = GroupCoordinator::new(
            Arc::new(store),
            Arc::new(SoftwareCustody::new()),
            Arc::new(StaticIdentity::signed_in(member)),
            config.protocol.clone(),
        );

        Ok(Self {
            coordinator,
            password: global.password.clone(),
        })
    }

    fn password(&self) -> Result<&str> {
        self.password
            .as_deref()
            .context("--password (or SANTA_PASSWORD) is required for this command")
    }

    /// Load the member's private key from their backup.
    async fn unlock(&self) -> Result<()> {
        self.coordinator
            .restore_key(self.password()?)
            .await
            .context("failed to unlock member key")?;
        Ok(())
    }
}

async fn run(session: &Session, command: Commands) -> Result<()> {
    let coordinator = &session.coordinator;

    match command {
        Commands::Enroll => {
            let profile = coordinator.enroll(session.password()?).await?;
            println!("Enrolled {}", profile.id);
            println!("  Public key : {}", profile.public_key);
        }

        Commands::Group(GroupCommand::Create { name }) => {
            let group = coordinator.create_group(&name).await?;
            println!("{}", group.id);
        }
        Commands::Group(GroupCommand::Join(arg)) => {
            let group = coordinator.join_group(&GroupId::new(arg.group)).await?;
            println!("Joined {} ({} members)", group.name, group.members.len());
        }
        Commands::Group(GroupCommand::Rule { group, giver, receiver }) => {
            coordinator
                .add_rule(&GroupId::new(group), MemberId::new(giver), MemberId::new(receiver))
                .await?;
        }
        Commands::Group(GroupCommand::Show(arg)) => {
            let group = coordinator.group(&GroupId::new(arg.group)).await?;
            println!("{}", serde_json::to_string_pretty(&group)?);
        }
        Commands::Group(GroupCommand::List) => {
            for group in coordinator.list_groups().await? {
                println!("{}  {:<10} {}", group.id, group.state, group.name);
            }
        }

        Commands::Match(arg) => {
            coordinator.start_matching(&GroupId::new(arg.group)).await?;
            println!("Assignment drawn. Each member can now run `santa view`.");
        }
        Commands::View(arg) => {
            session.unlock().await?;
            let receiver = coordinator.view_assignment(&GroupId::new(arg.group)).await?;
            println!("{receiver}");
        }

        Commands::Recovery(RecoveryCommand::Start(arg)) => {
            coordinator.initiate_recovery(&GroupId::new(arg.group)).await?;
        }
        Commands::Recovery(RecoveryCommand::Submit(arg)) => {
            session.unlock().await?;
            coordinator.submit_recovery_share(&GroupId::new(arg.group)).await?;
        }
        Commands::Recovery(RecoveryCommand::Status { group, .. }) => {
            let p = coordinator.recovery_progress(&GroupId::new(group)).await?;
            println!("{}/{}", p.collected, p.threshold);
        }
        Commands::Recovery(RecoveryCommand::Finalize(arg)) => {
            session.unlock().await?;
            let assignment = coordinator.finalize_recovery(&GroupId::new(arg.group)).await?;
            print_assignment(&assignment);
        }

        Commands::Version => print_version(),
    }

    Ok(())
}

fn print_assignment(assignment: &Assignment) {
    for (giver, receiver) in assignment.iter() {
        println!("{giver} -> {receiver}");
    }
}

fn print_version() {
    println!("santa     {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", santa_protocol::config::PROTOCOL_VERSION);
}
