// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Santa Protocol — Core Library
//!
//! A Secret Santa where nobody, the organizer included, learns the full
//! assignment during normal operation, and where the full assignment can
//! still be recovered later if a majority of the group agrees.
//!
//! The moving parts:
//!
//! 1. A derangement is drawn under the group's forced rules.
//! 2. The full assignment (the *master list*) is encrypted under a fresh
//!    256-bit master key.
//! 3. The master key is split with Shamir's scheme over GF(2^8) into one
//!    share per member, any `floor(n/2) + 1` of which reconstruct it.
//! 4. Each share, and each giver's own envelope key, is sealed to that
//!    member's X25519 public key.
//! 5. The master key and plaintext list are dropped. Only ciphertext is
//!    stored.
//!
//! Recovery reverses step 5: members re-seal their shares to the admin, who
//! reconstructs the master key once enough have arrived.
//!
//! ## Architecture
//!
//! - **crypto** — GF(256), Shamir, AES-256-GCM, X25519 wrapping, scrypt.
//! - **group** — group records, the state machine, and matching.
//! - **custody** — private-key custody behind a trait.
//! - **identity** — who is signed in.
//! - **storage** — the `GroupStore` contract with memory and sled backends.
//! - **orchestrator** — `GroupCoordinator`, the operations a member performs.
//! - **config** — protocol constants and runtime tunables.
//!
//! ## Design Rules
//!
//! 1. No unsafe code.
//! 2. Secret bytes are zeroized on drop wherever the type system lets us.
//! 3. The master key never reaches storage, logs or a return value.

pub mod config;
pub mod crypto;
pub mod custody;
pub mod group;
pub mod identity;
pub mod orchestrator;
pub mod storage;

pub use config::ProtocolConfig;
pub use custody::{KeyCustody, SoftwareCustody};
pub use group::matching::Assignment;
pub use group::{Group, GroupId, GroupState, MemberId, Rule};
pub use identity::{IdentityProvider, StaticIdentity};
pub use orchestrator::{GroupCoordinator, ProtocolError, ProtocolResult, RecoveryProgress};
pub use storage::{GroupStore, MemoryStore, SledStore};
