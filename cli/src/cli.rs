//! # CLI Interface
//!
//! Argument structure for `santa`, using `clap` derive. Global flags select
//! the data directory, the acting member and their password; subcommands map
//! one-to-one onto coordinator operations.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Secret Santa with threshold-recoverable assignments.
///
/// Nobody, the organizer included, sees the full assignment. Each member can
/// read only their own. A majority of the group can recover the full list
/// together.
#[derive(Parser, Debug)]
#[command(
    name = "santa",
    about = "Secret Santa with threshold-recoverable assignments",
    version,
    propagate_version = true
)]
pub struct SantaCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Path to a TOML configuration file.
    #[arg(long, short = 'c', global = true, env = "SANTA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the group database.
    ///
    /// Created on first use if it does not exist.
    #[arg(long, short = 'd', global = true, env = "SANTA_DATA_DIR", default_value = ".santa")]
    pub data_dir: PathBuf,

    /// Member id to act as.
    #[arg(long, short = 'm', global = true, env = "SANTA_MEMBER")]
    pub member: Option<String>,

    /// Password protecting the member's private key backup.
    #[arg(long, global = true, env = "SANTA_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Log level override, e.g. `debug` or `santa_protocol=trace`.
    #[arg(long, global = true, env = "SANTA_LOG")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a key pair for the member and publish their profile.
    Enroll,
    /// Create, join and configure groups.
    #[command(subcommand)]
    Group(GroupCommand),
    /// Draw the assignment for a pending group (admin only).
    Match(GroupArg),
    /// Show who the member gives a gift to.
    View(GroupArg),
    /// Recover the full assignment with a majority of members.
    #[command(subcommand)]
    Recovery(RecoveryCommand),
    /// Print version information and exit.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
    /// Create a group with the member as admin.
    Create {
        /// Display name of the group.
        name: String,
    },
    /// Join a pending group.
    Join(GroupArg),
    /// Force GIVER to draw RECEIVER (admin only).
    Rule {
        group: String,
        giver: String,
        receiver: String,
    },
    /// Print a group as JSON.
    Show(GroupArg),
    /// List every group in the database.
    List,
}

#[derive(Subcommand, Debug)]
pub enum RecoveryCommand {
    /// Open a recovery episode (admin only).
    Start(GroupArg),
    /// Re-seal the member's share for the admin.
    Submit(GroupArg),
    /// Show how many shares have been collected.
    Status {
        group: String,
        /// Keep polling until the threshold is met.
        ///
        /// The database is opened only for each poll, so other members'
        /// `recovery submit` can take the lock in between.
        #[arg(long)]
        follow: bool,
        /// Seconds between polls with `--follow`.
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// Reconstruct the master key and print the full assignment (admin only).
    Finalize(GroupArg),
}

#[derive(Args, Debug)]
pub struct GroupArg {
    /// Group id.
    pub group: String,
}
