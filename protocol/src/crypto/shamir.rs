//! # Shamir's Secret Sharing over GF(256)
//!
//! Splits a secret (in practice a 32-byte master key) into `n` shares such
//! that any `k` of them reconstruct it exactly and any `k - 1` reveal nothing
//! beyond its length.
//!
//! Each byte of the secret is shared independently: a fresh random polynomial
//! of degree `k - 1` whose constant term is the secret byte, evaluated at
//! x = 1..=n in [`gf256`](super::gf256). Reconstruction is Lagrange
//! interpolation at x = 0.
//!
//! ## Share encoding
//!
//! A share serializes as `[x] ++ [y_0, y_1, ..., y_{len-1}]`: the
//! x-coordinate is stored once, followed by one y-value per secret byte.
//! A share is therefore always `secret.len() + 1` bytes long.
//!
//! ## Threshold is a caller contract
//!
//! [`combine_shares`] cannot tell whether it was handed enough shares. With
//! fewer than `k` it returns a deterministic value that has nothing to do with
//! the secret, and no error. Callers that know `k` should use
//! [`combine_with_threshold`], or check the count themselves, and verify the
//! result (the orchestrator does this by authenticating the master list).
//!
//! ```
//! use santa_protocol::crypto::shamir::{combine_shares, split_secret, ShamirConfig};
//!
//! let secret = b"this is a 32-byte seed value!!!!";
//! let config = ShamirConfig::new(3, 5).unwrap();
//! let shares = split_secret(secret, &config).unwrap();
//!
//! let recovered = combine_shares(&shares[1..4]).unwrap();
//! assert_eq!(secret.as_slice(), recovered.as_slice());
//! ```

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::gf256::{self, FieldError};
use crate::config::MAX_SHARES;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during secret sharing operations.
#[derive(Debug, Error)]
pub enum ShamirError {
    /// Threshold or share count out of range: must satisfy 1 <= k <= n < 256.
    #[error("invalid sharing parameters: threshold {threshold}, total shares {total}")]
    InvalidParameters {
        /// Requested threshold `k`.
        threshold: usize,
        /// Requested share count `n`.
        total: usize,
    },

    /// `combine` was called with an empty slice.
    #[error("no shares supplied")]
    NoShares,

    /// Shares have inconsistent data lengths.
    #[error("share data lengths are inconsistent: expected {expected}, got {got}")]
    InconsistentShareLengths {
        /// Expected length from the first share.
        expected: usize,
        /// Actual length of the offending share.
        got: usize,
    },

    /// The same x-coordinate appeared twice, or x = 0 was supplied.
    #[error("duplicate or reserved share index: {0}")]
    DuplicateShareIndex(u8),

    /// A serialized share was too short to hold its x-coordinate.
    #[error("malformed share encoding")]
    MalformedShare,

    /// Fewer shares than the threshold were supplied to a checked combine.
    #[error("insufficient shares: have {have}, need {need}")]
    InsufficientShares {
        /// Shares supplied.
        have: usize,
        /// Threshold required.
        need: usize,
    },

    /// Field arithmetic failed during interpolation.
    #[error(transparent)]
    Field(#[from] FieldError),
}

// ---------------------------------------------------------------------------
// Public Types
// ---------------------------------------------------------------------------

/// Threshold and share count for one split.
///
/// `(threshold, total_shares)`: any `threshold` shares reconstruct the
/// secret, `threshold - 1` shares reveal nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirConfig {
    threshold: u8,
    total_shares: u8,
}

impl ShamirConfig {
    /// Create a configuration, validating `1 <= threshold <= total_shares < 256`.
    ///
    /// A threshold of 1 is legal: every share is then a plain copy of the
    /// secret behind its x-coordinate.
    pub fn new(threshold: usize, total_shares: usize) -> Result<Self, ShamirError> {
        let invalid = ShamirError::InvalidParameters {
            threshold,
            total: total_shares,
        };
        if threshold == 0 || threshold > total_shares || total_shares > MAX_SHARES {
            return Err(invalid);
        }
        Ok(Self {
            threshold: threshold as u8,
            total_shares: total_shares as u8,
        })
    }

    /// Majority configuration for a group of `members`: `k = floor(n / 2) + 1`.
    pub fn majority(members: usize) -> Result<Self, ShamirError> {
        Self::new(crate::config::majority_threshold(members), members)
    }

    /// Minimum number of shares required to reconstruct the secret.
    pub fn threshold(&self) -> usize {
        self.threshold as usize
    }

    /// Total number of shares produced by a split.
    pub fn total_shares(&self) -> usize {
        self.total_shares as usize
    }
}

/// A single share of a split secret.
///
/// `index` is the x-coordinate (1-based; 0 is where the secret lives) and
/// `data` holds one y-value per byte of the original secret. Share data is
/// wiped from memory when the share is dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// The x-coordinate of this share's evaluation point.
    pub index: u8,
    /// The y-values, one per secret byte.
    pub data: Vec<u8>,
}

impl Share {
    /// Encode as `[index] ++ data`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 1);
        out.push(self.index);
        out.extend_from_slice(&self.data);
        out
    }

    /// Decode from `[index] ++ data`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShamirError> {
        let (&index, data) = bytes.split_first().ok_or(ShamirError::MalformedShare)?;
        Ok(Self {
            index,
            data: data.to_vec(),
        })
    }
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // y-values are secret material; the index and length are not.
        write!(f, "Share(index={}, len={})", self.index, self.data.len())
    }
}

// ---------------------------------------------------------------------------
// Split and Combine
// ---------------------------------------------------------------------------

/// Split a secret into `config.total_shares()` shares.
///
/// Random coefficients come from the OS CSPRNG.
pub fn split_secret(secret: &[u8], config: &ShamirConfig) -> Result<Vec<Share>, ShamirError> {
    split_secret_with_rng(secret, config, &mut rand::rngs::OsRng)
}

/// [`split_secret`] with an explicit randomness source.
///
/// Exposed for deterministic tests and benchmarks. Production callers should
/// stick with `split_secret`.
pub fn split_secret_with_rng<R: RngCore + ?Sized>(
    secret: &[u8],
    config: &ShamirConfig,
    rng: &mut R,
) -> Result<Vec<Share>, ShamirError> {
    let threshold = config.threshold();
    let total = config.total_shares();

    let mut shares: Vec<Share> = (1..=total)
        .map(|i| Share {
            index: i as u8,
            data: Vec::with_capacity(secret.len()),
        })
        .collect();

    // [secret_byte, c_1, ..., c_{k-1}], reused across bytes and wiped after.
    let mut coefficients = vec![0u8; threshold];

    for &secret_byte in secret {
        coefficients[0] = secret_byte;
        rng.fill_bytes(&mut coefficients[1..]);

        for share in shares.iter_mut() {
            let y = gf256::eval_polynomial(&coefficients, share.index);
            share.data.push(y);
        }
    }

    coefficients.zeroize();
    Ok(shares)
}

/// Reconstruct a secret from shares by Lagrange interpolation at x = 0.
///
/// Requires at least one share, equal data lengths and distinct non-zero
/// indices. Does **not** know the threshold: with too few shares the output
/// is wrong but no error is raised. See the module docs.
pub fn combine_shares(shares: &[Share]) -> Result<Vec<u8>, ShamirError> {
    let first = shares.first().ok_or(ShamirError::NoShares)?;
    let expected_len = first.data.len();

    for share in &shares[1..] {
        if share.data.len() != expected_len {
            return Err(ShamirError::InconsistentShareLengths {
                expected: expected_len,
                got: share.data.len(),
            });
        }
    }

    let mut seen = [false; 256];
    for share in shares {
        if share.index == 0 || seen[share.index as usize] {
            return Err(ShamirError::DuplicateShareIndex(share.index));
        }
        seen[share.index as usize] = true;
    }

    let xs: Vec<u8> = shares.iter().map(|s| s.index).collect();
    let mut ys = vec![0u8; shares.len()];
    let mut secret = Vec::with_capacity(expected_len);

    for byte_idx in 0..expected_len {
        for (y, share) in ys.iter_mut().zip(shares) {
            *y = share.data[byte_idx];
        }
        secret.push(gf256::lagrange_interpolate_at_zero(&xs, &ys)?);
    }

    ys.zeroize();
    Ok(secret)
}

/// [`combine_shares`] with an explicit threshold check up front.
pub fn combine_with_threshold(shares: &[Share], threshold: usize) -> Result<Vec<u8>, ShamirError> {
    if shares.len() < threshold {
        return Err(ShamirError::InsufficientShares {
            have: shares.len(),
            need: threshold,
        });
    }
    combine_shares(shares)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    /// Every k-element subset of `0..n`, in lexicographic order.
    fn subsets(n: usize, k: usize) -> Vec<Vec<usize>> {
        fn go(start: usize, n: usize, k: usize, cur: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
            if cur.len() == k {
                out.push(cur.clone());
                return;
            }
            for i in start..n {
                cur.push(i);
                go(i + 1, n, k, cur, out);
                cur.pop();
            }
        }
        let mut out = Vec::new();
        go(0, n, k, &mut Vec::new(), &mut out);
        out
    }

    fn pick(shares: &[Share], idx: &[usize]) -> Vec<Share> {
        idx.iter().map(|&i| shares[i].clone()).collect()
    }

    #[test]
    fn ascii_secret_3_of_5_every_subset() {
        let secret = b"abcdefghijklmnopqrstuvwxyz";
        let config = ShamirConfig::new(3, 5).unwrap();
        let shares = split_secret(secret, &config).unwrap();

        assert_eq!(shares.len(), 5);
        for share in &shares {
            assert_eq!(share.to_bytes().len(), 27);
        }

        for combo in subsets(5, 3) {
            let recovered = combine_shares(&pick(&shares, &combo)).unwrap();
            assert_eq!(secret.as_slice(), recovered.as_slice(), "combo {combo:?}");
        }

        for combo in subsets(5, 2) {
            let recovered = combine_shares(&pick(&shares, &combo)).unwrap();
            assert_ne!(secret.as_slice(), recovered.as_slice(), "combo {combo:?}");
        }

        assert_eq!(combine_shares(&shares).unwrap(), secret);
    }

    #[test]
    fn random_key_6_of_10_shuffled() {
        let mut rng = StdRng::seed_from_u64(0x5EC2E7);
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);

        let config = ShamirConfig::new(6, 10).unwrap();
        let mut shares = split_secret(&secret, &config).unwrap();

        for _ in 0..20 {
            shares.shuffle(&mut rng);
            let recovered = combine_shares(&shares[..6]).unwrap();
            assert_eq!(secret.as_slice(), recovered.as_slice());
        }
    }

    #[test]
    fn threshold_one_is_a_copy() {
        let secret = b"no sharing at all";
        let config = ShamirConfig::new(1, 4).unwrap();
        let shares = split_secret(secret, &config).unwrap();
        for share in &shares {
            assert_eq!(share.data, secret);
            assert_eq!(combine_shares(std::slice::from_ref(share)).unwrap(), secret);
        }
    }

    #[test]
    fn threshold_equal_to_total() {
        let secret = [0xDE, 0xAD, 0xBE, 0xEF];
        let config = ShamirConfig::new(4, 4).unwrap();
        let shares = split_secret(&secret, &config).unwrap();
        assert_eq!(combine_shares(&shares).unwrap(), secret);
        assert_ne!(combine_shares(&shares[..3]).unwrap(), secret);
    }

    #[test]
    fn maximum_share_count() {
        let secret = b"wide";
        let config = ShamirConfig::new(128, 255).unwrap();
        let shares = split_secret(secret, &config).unwrap();
        assert_eq!(shares.len(), 255);
        assert_eq!(shares.last().unwrap().index, 255);
        let recovered = combine_shares(&shares[127..]).unwrap();
        assert_eq!(secret.as_slice(), recovered.as_slice());
    }

    #[test]
    fn config_validation() {
        assert!(ShamirConfig::new(0, 3).is_err());
        assert!(ShamirConfig::new(5, 3).is_err());
        assert!(ShamirConfig::new(2, 256).is_err());
        assert!(ShamirConfig::new(1, 1).is_ok());
        assert!(ShamirConfig::new(2, 255).is_ok());
        assert!(matches!(
            ShamirConfig::new(4, 3),
            Err(ShamirError::InvalidParameters {
                threshold: 4,
                total: 3
            })
        ));
    }

    #[test]
    fn majority_config() {
        let config = ShamirConfig::majority(7).unwrap();
        assert_eq!(config.threshold(), 4);
        assert_eq!(config.total_shares(), 7);
        assert!(ShamirConfig::majority(0).is_err());
    }

    #[test]
    fn empty_secret_gives_index_only_shares() {
        let config = ShamirConfig::new(2, 3).unwrap();
        let shares = split_secret(&[], &config).unwrap();
        assert!(shares.iter().all(|s| s.data.is_empty()));
        assert_eq!(shares[0].to_bytes(), vec![1]);
        assert!(combine_shares(&shares[..2]).unwrap().is_empty());
    }

    #[test]
    fn combine_requires_a_share() {
        assert!(matches!(combine_shares(&[]), Err(ShamirError::NoShares)));
    }

    #[test]
    fn duplicate_share_indices_rejected() {
        let share = Share {
            index: 1,
            data: vec![42],
        };
        let result = combine_shares(&[share.clone(), share]);
        assert!(matches!(result, Err(ShamirError::DuplicateShareIndex(1))));
    }

    #[test]
    fn zero_index_rejected() {
        let share = Share {
            index: 0,
            data: vec![42],
        };
        assert!(matches!(
            combine_shares(&[share]),
            Err(ShamirError::DuplicateShareIndex(0))
        ));
    }

    #[test]
    fn inconsistent_share_lengths_rejected() {
        let shares = vec![
            Share {
                index: 1,
                data: vec![1, 2, 3],
            },
            Share {
                index: 2,
                data: vec![4, 5],
            },
        ];
        assert!(matches!(
            combine_shares(&shares),
            Err(ShamirError::InconsistentShareLengths {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn checked_combine_enforces_threshold() {
        let secret = b"checked";
        let config = ShamirConfig::new(3, 5).unwrap();
        let shares = split_secret(secret, &config).unwrap();

        assert!(matches!(
            combine_with_threshold(&shares[..2], 3),
            Err(ShamirError::InsufficientShares { have: 2, need: 3 })
        ));
        assert_eq!(combine_with_threshold(&shares[..3], 3).unwrap(), secret);
    }

    #[test]
    fn share_byte_encoding_round_trip() {
        let secret = b"encode me";
        let config = ShamirConfig::new(2, 3).unwrap();
        let shares = split_secret(secret, &config).unwrap();

        let decoded: Vec<Share> = shares
            .iter()
            .map(|s| Share::from_bytes(&s.to_bytes()).unwrap())
            .collect();
        assert_eq!(decoded, shares);
        assert_eq!(combine_shares(&decoded[1..]).unwrap(), secret);

        assert!(matches!(Share::from_bytes(&[]), Err(ShamirError::MalformedShare)));
    }

    #[test]
    fn deterministic_with_seeded_rng() {
        let secret = b"seeded";
        let config = ShamirConfig::new(2, 3).unwrap();
        let a = split_secret_with_rng(secret, &config, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = split_secret_with_rng(secret, &config, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn debug_does_not_print_share_data() {
        let share = Share {
            index: 3,
            data: vec![0xAB, 0xCD],
        };
        let rendered = format!("{share:?}");
        assert_eq!(rendered, "Share(index=3, len=2)");
    }
}
