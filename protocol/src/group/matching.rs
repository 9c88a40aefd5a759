//! # Matching Engine
//!
//! Produces a random derangement of the group (nobody draws themself) that
//! honours every forced-assignment [`Rule`].
//!
//! Rules are baked in rather than filtered for: forced pairs are fixed first,
//! then the leftover receivers are shuffled over the leftover givers, and
//! only the no-self-assignment condition is left to rejection sampling. Each
//! retry draws a uniform permutation of the leftovers, so the accepted
//! assignment is uniform over all valid ones.
//!
//! The retry loop is bounded. Exhausting it yields
//! [`MatchingError::MatchingInfeasible`]. That happens when the forced pairs
//! leave no derangement of the leftovers, for example a single leftover giver
//! whose only leftover receiver is themself, or when valid completions are
//! so rare among the leftover permutations that the budget runs out first.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

use super::{MemberId, Rule};
use crate::config::MIN_GROUP_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchingError {
    #[error("need at least {MIN_GROUP_SIZE} members to match, got {0}")]
    NotEnoughMembers(usize),

    #[error("member {0} listed twice")]
    DuplicateMember(MemberId),

    #[error("invalid rule {rule}: {reason}")]
    InvalidRule { rule: Rule, reason: &'static str },

    #[error("no valid assignment found after {attempts} attempts")]
    MatchingInfeasible { attempts: usize },

    #[error("malformed master list: {0}")]
    MalformedMasterList(String),
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// A complete giver -> receiver mapping.
///
/// This is the plaintext "master list". It only exists in memory while
/// matching runs and again after a successful recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignment {
    pairs: BTreeMap<MemberId, MemberId>,
}

impl Assignment {
    pub fn receiver_for(&self, giver: &MemberId) -> Option<&MemberId> {
        self.pairs.get(giver)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemberId, &MemberId)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Serialized master list: a JSON object keyed by giver.
    pub fn to_master_list(&self) -> Result<Vec<u8>, MatchingError> {
        serde_json::to_vec(self).map_err(|e| MatchingError::MalformedMasterList(e.to_string()))
    }

    pub fn from_master_list(bytes: &[u8]) -> Result<Self, MatchingError> {
        serde_json::from_slice(bytes).map_err(|e| MatchingError::MalformedMasterList(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// compute_assignment
// ---------------------------------------------------------------------------

/// Compute a random assignment with the thread-local CSPRNG.
pub fn compute_assignment(
    members: &[MemberId],
    rules: &[Rule],
    max_attempts: usize,
) -> Result<Assignment, MatchingError> {
    compute_assignment_with_rng(members, rules, max_attempts, &mut rand::thread_rng())
}

/// [`compute_assignment`] with an explicit randomness source.
pub fn compute_assignment_with_rng<R: Rng + ?Sized>(
    members: &[MemberId],
    rules: &[Rule],
    max_attempts: usize,
    rng: &mut R,
) -> Result<Assignment, MatchingError> {
    if members.len() < MIN_GROUP_SIZE {
        return Err(MatchingError::NotEnoughMembers(members.len()));
    }

    let mut seen = HashSet::with_capacity(members.len());
    for member in members {
        if !seen.insert(member) {
            return Err(MatchingError::DuplicateMember(member.clone()));
        }
    }

    let forced = validate_rules(members, rules)?;
    let forced_receivers: HashSet<&MemberId> = forced.values().copied().collect();

    let free_givers: Vec<&MemberId> = members.iter().filter(|m| !forced.contains_key(m)).collect();
    let mut free_receivers: Vec<&MemberId> = members
        .iter()
        .filter(|m| !forced_receivers.contains(m))
        .collect();

    for attempt in 1..=max_attempts {
        free_receivers.shuffle(rng);

        let has_fixed_point = free_givers
            .iter()
            .zip(&free_receivers)
            .any(|(giver, receiver)| giver == receiver);
        if has_fixed_point {
            continue;
        }

        let pairs = forced
            .iter()
            .map(|(g, r)| ((*g).clone(), (*r).clone()))
            .chain(
                free_givers
                    .iter()
                    .zip(&free_receivers)
                    .map(|(g, r)| ((*g).clone(), (*r).clone())),
            )
            .collect();

        tracing::debug!(members = members.len(), rules = forced.len(), attempt, "assignment found");
        return Ok(Assignment { pairs });
    }

    tracing::warn!(
        members = members.len(),
        rules = forced.len(),
        max_attempts,
        "matching gave up"
    );
    Err(MatchingError::MatchingInfeasible {
        attempts: max_attempts,
    })
}

/// Check that the rules form a partial injective map over members with no
/// fixed points. Returns giver -> receiver.
fn validate_rules<'a>(
    members: &[MemberId],
    rules: &'a [Rule],
) -> Result<HashMap<&'a MemberId, &'a MemberId>, MatchingError> {
    let invalid = |rule: &Rule, reason| MatchingError::InvalidRule {
        rule: rule.clone(),
        reason,
    };

    let mut forced: HashMap<&MemberId, &MemberId> = HashMap::with_capacity(rules.len());
    let mut taken: HashSet<&MemberId> = HashSet::with_capacity(rules.len());

    for rule in rules {
        if !members.contains(&rule.giver) || !members.contains(&rule.receiver) {
            return Err(invalid(rule, "not a member"));
        }
        if rule.giver == rule.receiver {
            return Err(invalid(rule, "giver and receiver are the same member"));
        }
        match forced.get(&rule.giver) {
            Some(existing) if *existing == &rule.receiver => continue,
            Some(_) => return Err(invalid(rule, "giver already has a forced receiver")),
            None => {}
        }
        if !taken.insert(&rule.receiver) {
            return Err(invalid(rule, "receiver is already forced for another giver"));
        }
        forced.insert(&rule.giver, &rule.receiver);
    }

    Ok(forced)
}
