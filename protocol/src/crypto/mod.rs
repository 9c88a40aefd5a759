//! # Cryptographic Primitives
//!
//! Everything the protocol does to bytes lives under here. Nothing in this
//! module touches storage or async code; every function is synchronous,
//! CPU-bound, and only consumes entropy from the OS CSPRNG.
//!
//! - **gf256** — byte arithmetic in GF(2^8), the substrate for sharing.
//! - **shamir** — split a master key into `n` shares, recombine any `k`.
//! - **encryption** — AES-256-GCM with `nonce || ciphertext || tag` blobs.
//! - **wrap** — X25519 sealed boxes for small payloads addressed to a member.
//! - **kdf** — scrypt password derivation and password-sealed backups.
//!
//! Everything here wraps audited implementations (`aes-gcm`, `x25519-dalek`,
//! `blake3`, `scrypt`). The only arithmetic written by hand is the field
//! itself, and it is small enough to test exhaustively.

pub mod encryption;
pub mod gf256;
pub mod kdf;
pub mod shamir;
pub mod wrap;

pub use encryption::{decrypt, encrypt, SymmetricKey};
pub use shamir::{combine_shares, split_secret, ShamirConfig, Share};
pub use wrap::{unwrap_with_secret, wrap_for_member, MemberPublicKey, MemberSecretKey};
