//! # Orchestrator
//!
//! Ties group state, matching, sharing, wrapping and storage together into
//! the operations a member actually performs: enroll, create and join a
//! group, run the matching, read one's own envelope, and take part in key
//! recovery.

pub mod coordinator;
pub mod error;

pub use coordinator::{GroupCoordinator, RecoveryProgress};
pub use error::{ProtocolError, ProtocolResult};
