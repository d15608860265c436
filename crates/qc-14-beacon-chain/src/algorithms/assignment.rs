//! # Candidate Assignment
//!
//! Distributes shard candidates across shards with the epoch random number.
//!
//! A candidate's shard is `sum(keccak(key || seed)) % active_shards`. A shard
//! stops absorbing candidates once its pending list would exceed
//! `assign_offset`; candidates that don't fit stay in the pool for the next
//! epoch, in shuffled order.

use super::shuffle::shuffle;
use crate::domain::{CommitteeError, CommitteeKey};
use shared_types::{keccak256_concat, ShardId};
use std::collections::BTreeMap;

/// Result of one assignment round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    /// Candidates not placed this round.
    pub remaining: Vec<CommitteeKey>,
    /// Candidates placed per shard, in placement order.
    pub assigned: BTreeMap<ShardId, Vec<CommitteeKey>>,
}

/// Shard a candidate lands in for `seed`.
pub fn candidate_shard_id(key: &CommitteeKey, seed: i64, active_shards: u8) -> ShardId {
    let digest = keccak256_concat([key.as_bytes(), &seed.to_le_bytes()]);
    let sum: u64 = digest.iter().map(|b| u64::from(*b)).sum();
    (sum % u64::from(active_shards)) as ShardId
}

/// Assign `candidates` to shards.
///
/// `pending_count_by_shard` holds each shard's current pending-list length;
/// shards missing from the map count as empty.
pub fn assign_candidates(
    candidates: &[CommitteeKey],
    pending_count_by_shard: &BTreeMap<ShardId, usize>,
    seed: i64,
    assign_offset: usize,
    active_shards: u8,
) -> Result<Assignment, CommitteeError> {
    if active_shards == 0 {
        return Err(CommitteeError::NoActiveShards);
    }
    if assign_offset == 0 {
        return Err(CommitteeError::ZeroOffset("assign offset"));
    }

    let mut counts = pending_count_by_shard.clone();
    let mut result = Assignment::default();

    for key in shuffle(candidates, seed) {
        let shard_id = candidate_shard_id(&key, seed, active_shards);
        let count = counts.entry(shard_id).or_insert(0);
        if *count + 1 > assign_offset {
            result.remaining.push(key);
            continue;
        }
        *count += 1;
        result.assigned.entry(shard_id).or_default().push(key);
    }

    Ok(result)
}
