//! # Protocol Configuration & Constants
//!
//! Every magic number in the gift-exchange protocol lives here. If you're
//! hardcoding a key length or a retry budget somewhere else, move it here.
//!
//! Two kinds of values live in this module:
//!
//! - **Constants** that define wire layouts (key sizes, nonce sizes, share
//!   index bounds). Changing these breaks every envelope already stored.
//! - **[`ProtocolConfig`]**, the small set of runtime tunables (matching retry
//!   budget, password-KDF cost) that a deployment may legitimately adjust.

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::KdfParams;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full version string of the envelope/sharing format.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Symmetric Encryption (AES-256-GCM)
// ---------------------------------------------------------------------------

/// AES-256-GCM for every symmetric layer: the master list, the per-giver
/// envelopes, the password-sealed key backups and the inner half of a
/// wrapped payload.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM key length in bytes. Master keys and single-use envelope keys
/// are both this size.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. Twelve, always.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

// ---------------------------------------------------------------------------
// Key Wrapping (X25519 sealed box)
// ---------------------------------------------------------------------------

/// Asymmetric algorithm used to wrap small payloads for a single member.
pub const KEY_EXCHANGE_ALGORITHM: &str = "X25519";

/// X25519 public key length in bytes. Also the length of the ephemeral key
/// prefix on every wrapped payload.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// X25519 secret key length in bytes.
pub const SECRET_KEY_LENGTH: usize = 32;

/// Largest payload accepted by [`crate::crypto::wrap::wrap_for_member`].
///
/// Wrapping is meant for keys and shares, not documents. A master-key share
/// is 33 bytes and an envelope key is 32; anything near this limit means the
/// caller should be using envelope encryption instead.
pub const MAX_WRAP_PLAINTEXT_LENGTH: usize = 256;

/// Overhead added by wrapping: ephemeral public key + nonce + tag.
pub const WRAP_OVERHEAD: usize = PUBLIC_KEY_LENGTH + AES_NONCE_LENGTH + AES_TAG_LENGTH;

/// BLAKE3 `derive_key` context for wrap keys. Changing it orphans every
/// wrapped share and envelope key in storage.
pub const WRAP_KDF_CONTEXT: &str = "santa-protocol v1 member wrap key";

// ---------------------------------------------------------------------------
// Secret Sharing
// ---------------------------------------------------------------------------

/// Highest share count the byte-oriented field can address. x-coordinates are
/// the non-zero elements of GF(256), so `n` must stay below 256.
pub const MAX_SHARES: usize = 255;

/// Smallest group the matching engine will accept. A single member can only
/// be assigned to themself.
pub const MIN_GROUP_SIZE: usize = 2;

// ---------------------------------------------------------------------------
// Password Key Derivation (scrypt)
// ---------------------------------------------------------------------------

/// Salt length for password-derived keys.
pub const KDF_SALT_LENGTH: usize = 16;

/// Default scrypt cost: N = 2^15.
pub const DEFAULT_SCRYPT_LOG_N: u8 = 15;

/// Default scrypt block size.
pub const DEFAULT_SCRYPT_R: u32 = 8;

/// Default scrypt parallelism.
pub const DEFAULT_SCRYPT_P: u32 = 1;

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// How many candidate permutations the matching engine draws before it gives
/// up with `MatchingInfeasible`.
pub const DEFAULT_MAX_MATCHING_ATTEMPTS: usize = 100;

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Runtime tunables for the protocol.
///
/// Deserializable so that front ends can load it from a TOML file; every field
/// falls back to its default when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Candidate permutations drawn before matching fails.
    pub max_matching_attempts: usize,
    /// Cost parameters for password-derived keys.
    pub kdf: KdfParams,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_matching_attempts: DEFAULT_MAX_MATCHING_ATTEMPTS,
            kdf: KdfParams::default(),
        }
    }
}

/// Majority threshold for a group of `members`: `floor(n / 2) + 1`.
///
/// Any `k` shares reconstruct the master key, so at least one honest member
/// outside any minority coalition has to cooperate.
pub fn majority_threshold(members: usize) -> usize {
    members / 2 + 1
}
