//! # Domain Value Objects
//!
//! Small value types produced by state transitions and read by the
//! controller: committee roles, cross-shard acknowledgements, per-block
//! effects and committee snapshots for change detection.

use super::keys::CommitteeKey;
use serde::{Deserialize, Serialize};
use shared_types::ShardId;
use std::collections::BTreeMap;

/// Where a key currently sits in the beacon state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitteeRole {
    /// Beacon committee member.
    BeaconCommittee,
    /// Waiting to join the beacon committee.
    BeaconPending,
    /// Shard committee member.
    ShardCommittee(ShardId),
    /// Waiting to join a shard committee.
    ShardPending(ShardId),
    /// Beacon candidate (current or next random).
    BeaconCandidate,
    /// Shard candidate (current or next random).
    ShardCandidate,
    /// Unknown key.
    None,
}

impl CommitteeRole {
    /// Key holds a committee seat right now.
    pub fn is_committee_member(&self) -> bool {
        matches!(self, Self::BeaconCommittee | Self::ShardCommittee(_))
    }
}

/// Cross-shard height advanced by one beacon block.
///
/// Persisted as `(from, to, last) -> wait` plus the terminal
/// `(from, to, wait) -> 0` marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossShardAck {
    /// Sending shard.
    pub from: ShardId,
    /// Receiving shard.
    pub to: ShardId,
    /// Previously acknowledged height.
    pub last_height: u64,
    /// Newly acknowledged height.
    pub wait_height: u64,
}

/// Effects of applying one instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstructionEffect {
    /// Keys that entered the beacon candidate pool.
    pub new_beacon_candidates: Vec<CommitteeKey>,
    /// Keys that entered the shard candidate pool.
    pub new_shard_candidates: Vec<CommitteeKey>,
    /// A random instruction was applied.
    pub random_applied: bool,
}

/// Effects of applying one block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockEffects {
    /// Keys that entered the beacon candidate pool.
    pub new_beacon_candidates: Vec<CommitteeKey>,
    /// Keys that entered the shard candidate pool.
    pub new_shard_candidates: Vec<CommitteeKey>,
    /// A random instruction was applied.
    pub random_applied: bool,
    /// Cross-shard heights advanced by the block's shard states.
    pub cross_shard_acks: Vec<CrossShardAck>,
}

impl BlockEffects {
    /// Fold one instruction's effect into the block's.
    pub fn absorb(&mut self, effect: InstructionEffect) {
        self.new_beacon_candidates
            .extend(effect.new_beacon_candidates);
        self.new_shard_candidates.extend(effect.new_shard_candidates);
        self.random_applied |= effect.random_applied;
    }
}

/// Committee and pending lists captured before a block is applied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeSnapshot {
    /// Beacon committee.
    pub beacon_committee: Vec<CommitteeKey>,
    /// Beacon pending validators.
    pub beacon_pending: Vec<CommitteeKey>,
    /// Shard committees.
    pub shard_committee: BTreeMap<ShardId, Vec<CommitteeKey>>,
    /// Shard pending validators.
    pub shard_pending: BTreeMap<ShardId, Vec<CommitteeKey>>,
}

/// What changed between two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitteeChange {
    /// Beacon committee or pending list changed.
    pub beacon_changed: bool,
    /// Shards whose committee or pending list changed, ascending.
    pub changed_shards: Vec<ShardId>,
}

impl CommitteeSnapshot {
    /// Compare with a later snapshot. `None` when nothing changed.
    pub fn diff(&self, after: &CommitteeSnapshot) -> Option<CommitteeChange> {
        let beacon_changed = self.beacon_committee != after.beacon_committee
            || self.beacon_pending != after.beacon_pending;

        let mut shard_ids: Vec<ShardId> = self
            .shard_committee
            .keys()
            .chain(self.shard_pending.keys())
            .chain(after.shard_committee.keys())
            .chain(after.shard_pending.keys())
            .copied()
            .collect();
        shard_ids.sort_unstable();
        shard_ids.dedup();

        let changed_shards: Vec<ShardId> = shard_ids
            .into_iter()
            .filter(|id| {
                self.shard_committee.get(id) != after.shard_committee.get(id)
                    || self.shard_pending.get(id) != after.shard_pending.get(id)
            })
            .collect();

        if !beacon_changed && changed_shards.is_empty() {
            return None;
        }
        Some(CommitteeChange {
            beacon_changed,
            changed_shards,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CommitteeKey {
        CommitteeKey::parse(s).unwrap()
    }

    #[test]
    fn test_identical_snapshots_have_no_diff() {
        let snap = CommitteeSnapshot {
            beacon_committee: vec![key("b1")],
            ..Default::default()
        };
        assert_eq!(snap.diff(&snap.clone()), None);
    }

    #[test]
    fn test_shard_pending_change_detected() {
        let before = CommitteeSnapshot::default();
        let mut after = before.clone();
        after.shard_pending.insert(1, vec![key("s1")]);
        let change = before.diff(&after).unwrap();
        assert!(!change.beacon_changed);
        assert_eq!(change.changed_shards, vec![1]);
    }

    #[test]
    fn test_beacon_change_detected() {
        let before = CommitteeSnapshot::default();
        let after = CommitteeSnapshot {
            beacon_pending: vec![key("b9")],
            ..Default::default()
        };
        assert!(before.diff(&after).unwrap().beacon_changed);
    }

    #[test]
    fn test_absorb_merges_effects() {
        let mut block = BlockEffects::default();
        block.absorb(InstructionEffect {
            new_shard_candidates: vec![key("a")],
            ..Default::default()
        });
        block.absorb(InstructionEffect {
            random_applied: true,
            ..Default::default()
        });
        assert_eq!(block.new_shard_candidates, vec![key("a")]);
        assert!(block.random_applied);
    }

    #[test]
    fn test_role_membership() {
        assert!(CommitteeRole::ShardCommittee(0).is_committee_member());
        assert!(!CommitteeRole::BeaconPending.is_committee_member());
    }
}
