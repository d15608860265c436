//! # Beacon State
//!
//! The beacon best state: committees, pending validators, the two-phase
//! candidate pipeline, staking maps and shard tips.
//!
//! ## Candidate pipeline
//!
//! ```text
//! stake ──> *WaitingForNextRandom ──(height % epoch == random_time)──>
//!           *WaitingForCurrentRandom ──(random instruction)──> pending ──(swap)──> committee
//! ```
//!
//! Every map is a `BTreeMap`, so iteration (and therefore [`BeaconState::hash`]
//! and every root) is in ascending key order on every node.
//!
//! A state is only ever mutated as a private clone; the controller promotes
//! the clone once every post-check passes.

use super::block::{BeaconBlock, BeaconHeader};
use super::errors::{BeaconError, BeaconResult};
use super::instruction::{ChainRole, DecodedInstruction, Instruction, RANDOM_ACTION};
use super::keys::{CommitteeKey, PaymentAddress};
use super::value_objects::{CommitteeRole, CommitteeSnapshot};
use crate::config::ChainParams;
use crate::utils::encode_str;
use serde::{Deserialize, Serialize};
use shared_types::{keccak256, keccak256_concat, Hash, ShardId, ZERO_HASH};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Beacon best state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconState {
    /// Height of the best block.
    pub height: u64,
    /// Epoch of the best block.
    pub epoch: u64,
    /// Best block hash.
    pub best_block_hash: Hash,
    /// Parent of the best block.
    pub previous_best_block_hash: Hash,
    /// Best block timestamp.
    pub best_block_timestamp: i64,
    /// Best block round.
    pub best_block_round: u32,

    /// Beacon committee, seat order.
    pub beacon_committee: Vec<CommitteeKey>,
    /// Validators waiting to join the beacon committee.
    pub beacon_pending_validator: Vec<CommitteeKey>,
    /// Committee per shard, seat order.
    pub shard_committee: BTreeMap<ShardId, Vec<CommitteeKey>>,
    /// Validators waiting to join each shard committee.
    pub shard_pending_validator: BTreeMap<ShardId, Vec<CommitteeKey>>,

    /// Beacon candidates waiting for this epoch's random number.
    pub candidate_beacon_waiting_for_current_random: Vec<CommitteeKey>,
    /// Beacon candidates waiting for the next epoch's random number.
    pub candidate_beacon_waiting_for_next_random: Vec<CommitteeKey>,
    /// Shard candidates waiting for this epoch's random number.
    pub candidate_shard_waiting_for_current_random: Vec<CommitteeKey>,
    /// Shard candidates waiting for the next epoch's random number.
    pub candidate_shard_waiting_for_next_random: Vec<CommitteeKey>,

    /// Auto-staking flag per staked key.
    pub auto_staking: BTreeMap<CommitteeKey, bool>,
    /// Reward receiver per staked key.
    pub reward_receiver: BTreeMap<CommitteeKey, PaymentAddress>,

    /// Random number of the current epoch.
    pub current_random_number: i64,
    /// Timestamp of the block that snapshotted current-random candidates.
    pub current_random_time_stamp: i64,
    /// A random number was applied in the current epoch.
    pub is_get_random_number: bool,

    /// Latest shard height acknowledged per shard.
    pub best_shard_height: BTreeMap<ShardId, u64>,
    /// Latest shard hash acknowledged per shard.
    pub best_shard_hash: BTreeMap<ShardId, Hash>,
    /// Last acknowledged cross-shard height, `from -> to -> height`.
    pub last_cross_shard_state: BTreeMap<ShardId, BTreeMap<ShardId, u64>>,

    /// Blocks produced per key in the current epoch.
    pub num_of_blocks_by_producers: BTreeMap<CommitteeKey, u64>,
    /// Committee position of the best block's producer.
    pub beacon_proposer_index: usize,

    /// Number of shards.
    pub active_shards: u8,
    /// Beacon committee lower bound.
    pub min_beacon_committee_size: usize,
    /// Beacon committee upper bound.
    pub max_beacon_committee_size: usize,
    /// Shard committee lower bound.
    pub min_shard_committee_size: usize,
    /// Shard committee upper bound.
    pub max_shard_committee_size: usize,
}

impl BeaconState {
    /// Deep copy for a clone-apply-verify-commit round.
    ///
    /// A zero-value state means initialization never completed.
    pub fn try_clone(&self) -> BeaconResult<Self> {
        if self.height == 0 || self.beacon_committee.is_empty() {
            return Err(BeaconError::EmptyState);
        }
        Ok(self.clone())
    }

    /// Build the height-1 state from the genesis block.
    ///
    /// `stake beacon` seats the beacon committee directly, `stake shard`
    /// registers shard stakers and `assign` seats them in shard committees.
    pub fn from_genesis(genesis: &BeaconBlock, params: &ChainParams) -> BeaconResult<Self> {
        params.validate()?;
        let header = &genesis.header;
        if header.height != 1 {
            return Err(BeaconError::WrongBlockHeight {
                expected: 1,
                actual: header.height,
            });
        }
        if header.epoch != 1 {
            return Err(BeaconError::WrongEpoch {
                expected: 1,
                actual: header.epoch,
            });
        }

        let mut state = Self {
            height: 1,
            epoch: 1,
            best_block_hash: genesis.hash(),
            previous_best_block_hash: ZERO_HASH,
            best_block_timestamp: header.timestamp,
            best_block_round: header.round,
            active_shards: params.active_shards,
            min_beacon_committee_size: params.min_beacon_committee_size,
            max_beacon_committee_size: params.max_beacon_committee_size,
            min_shard_committee_size: params.min_shard_committee_size,
            max_shard_committee_size: params.max_shard_committee_size,
            ..Default::default()
        };

        let mut unseated_shard_stakers = BTreeSet::new();
        for inst in &genesis.body.instructions {
            match DecodedInstruction::parse(inst)? {
                DecodedInstruction::Stake { role, stakers } => {
                    for staker in stakers {
                        if state.contains_key(&staker.key)
                            || unseated_shard_stakers.contains(&staker.key)
                        {
                            return Err(BeaconError::DuplicateStakePublicKey(
                                staker.key.to_string(),
                            ));
                        }
                        state
                            .reward_receiver
                            .insert(staker.key.clone(), staker.reward_receiver);
                        state
                            .auto_staking
                            .insert(staker.key.clone(), staker.auto_staking);
                        match role {
                            ChainRole::Beacon => state.beacon_committee.push(staker.key),
                            ChainRole::Shard => {
                                unseated_shard_stakers.insert(staker.key);
                            }
                        }
                    }
                }
                DecodedInstruction::Assign {
                    candidates,
                    shard_id,
                } => {
                    if shard_id >= state.active_shards {
                        return Err(BeaconError::InvalidAssign(format!(
                            "shard {} out of range",
                            shard_id
                        )));
                    }
                    for key in candidates {
                        if !unseated_shard_stakers.remove(&key) {
                            return Err(BeaconError::InvalidAssign(format!(
                                "{} is not an unseated shard staker",
                                key
                            )));
                        }
                        state.shard_committee.entry(shard_id).or_default().push(key);
                    }
                }
                DecodedInstruction::Random { nonce, .. } => {
                    state.current_random_number = nonce;
                }
                DecodedInstruction::Metadata { .. } => {}
                other => {
                    return Err(BeaconError::InvalidState(format!(
                        "{} instruction not allowed in genesis",
                        other.action()
                    )));
                }
            }
        }

        if let Some(key) = unseated_shard_stakers.into_iter().next() {
            return Err(BeaconError::InvalidState(format!(
                "genesis shard staker {} not assigned",
                key
            )));
        }
        for shard_id in 0..state.active_shards {
            state.shard_committee.entry(shard_id).or_default();
            state.shard_pending_validator.entry(shard_id).or_default();
        }
        state.beacon_proposer_index = state
            .beacon_committee
            .iter()
            .position(|k| k == &header.producer)
            .unwrap_or(0);

        super::invariants::invariant_committee_bounds(&state)?;
        debug!(
            beacon_committee = state.beacon_committee.len(),
            shards = state.active_shards,
            "Beacon state built from genesis"
        );
        Ok(state)
    }

    /// Canonical hash of the whole state.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.epoch.to_le_bytes());
        buf.extend_from_slice(&self.best_block_hash);
        buf.extend_from_slice(&self.previous_best_block_hash);
        buf.extend_from_slice(&self.best_block_timestamp.to_le_bytes());
        buf.extend_from_slice(&self.best_block_round.to_le_bytes());

        encode_keys(&mut buf, &self.beacon_committee);
        encode_keys(&mut buf, &self.beacon_pending_validator);
        encode_shard_keys(&mut buf, &self.shard_committee);
        encode_shard_keys(&mut buf, &self.shard_pending_validator);
        encode_keys(&mut buf, &self.candidate_beacon_waiting_for_current_random);
        encode_keys(&mut buf, &self.candidate_beacon_waiting_for_next_random);
        encode_keys(&mut buf, &self.candidate_shard_waiting_for_current_random);
        encode_keys(&mut buf, &self.candidate_shard_waiting_for_next_random);

        encode_auto_staking(&mut buf, &self.auto_staking);
        buf.extend_from_slice(&(self.reward_receiver.len() as u32).to_le_bytes());
        for (key, receiver) in &self.reward_receiver {
            encode_str(&mut buf, key.as_str());
            encode_str(&mut buf, receiver.as_str());
        }

        buf.extend_from_slice(&self.current_random_number.to_le_bytes());
        buf.extend_from_slice(&self.current_random_time_stamp.to_le_bytes());
        buf.push(u8::from(self.is_get_random_number));

        buf.extend_from_slice(&(self.best_shard_height.len() as u32).to_le_bytes());
        for (shard_id, height) in &self.best_shard_height {
            buf.push(*shard_id);
            buf.extend_from_slice(&height.to_le_bytes());
        }
        buf.extend_from_slice(&(self.best_shard_hash.len() as u32).to_le_bytes());
        for (shard_id, hash) in &self.best_shard_hash {
            buf.push(*shard_id);
            buf.extend_from_slice(hash);
        }
        buf.extend_from_slice(&(self.last_cross_shard_state.len() as u32).to_le_bytes());
        for (from, targets) in &self.last_cross_shard_state {
            buf.push(*from);
            buf.extend_from_slice(&(targets.len() as u32).to_le_bytes());
            for (to, height) in targets {
                buf.push(*to);
                buf.extend_from_slice(&height.to_le_bytes());
            }
        }

        buf.extend_from_slice(&(self.num_of_blocks_by_producers.len() as u32).to_le_bytes());
        for (key, count) in &self.num_of_blocks_by_producers {
            encode_str(&mut buf, key.as_str());
            buf.extend_from_slice(&count.to_le_bytes());
        }
        buf.extend_from_slice(&(self.beacon_proposer_index as u64).to_le_bytes());

        buf.push(self.active_shards);
        for bound in [
            self.min_beacon_committee_size,
            self.max_beacon_committee_size,
            self.min_shard_committee_size,
            self.max_shard_committee_size,
        ] {
            buf.extend_from_slice(&(bound as u64).to_le_bytes());
        }

        keccak256(&buf)
    }

    /// `BeaconCommitteeAndValidatorRoot`.
    pub fn beacon_committee_and_validator_root(&self) -> Hash {
        keccak256_concat([
            key_list_hash(&self.beacon_committee).as_slice(),
            key_list_hash(&self.beacon_pending_validator).as_slice(),
        ])
    }

    /// `BeaconCandidateRoot`.
    pub fn beacon_candidate_root(&self) -> Hash {
        keccak256_concat([
            key_list_hash(&self.candidate_beacon_waiting_for_current_random).as_slice(),
            key_list_hash(&self.candidate_beacon_waiting_for_next_random).as_slice(),
        ])
    }

    /// `ShardCandidateRoot`.
    pub fn shard_candidate_root(&self) -> Hash {
        keccak256_concat([
            key_list_hash(&self.candidate_shard_waiting_for_current_random).as_slice(),
            key_list_hash(&self.candidate_shard_waiting_for_next_random).as_slice(),
        ])
    }

    /// `ShardCommitteeAndValidatorRoot`.
    pub fn shard_committee_and_validator_root(&self) -> Hash {
        let mut buf = Vec::new();
        encode_shard_keys(&mut buf, &self.shard_committee);
        encode_shard_keys(&mut buf, &self.shard_pending_validator);
        keccak256(&buf)
    }

    /// `AutoStakingRoot`.
    pub fn auto_staking_root(&self) -> Hash {
        let mut buf = Vec::new();
        encode_auto_staking(&mut buf, &self.auto_staking);
        keccak256(&buf)
    }

    /// All five header roots.
    pub fn roots(&self) -> StateRoots {
        StateRoots {
            beacon_committee_and_validator: self.beacon_committee_and_validator_root(),
            beacon_candidate: self.beacon_candidate_root(),
            shard_candidate: self.shard_candidate_root(),
            shard_committee_and_validator: self.shard_committee_and_validator_root(),
            auto_staking: self.auto_staking_root(),
        }
    }

    /// Role of `key`. Committees are checked before pending lists and
    /// candidates.
    pub fn role_of(&self, key: &CommitteeKey) -> CommitteeRole {
        if self.beacon_committee.contains(key) {
            return CommitteeRole::BeaconCommittee;
        }
        if self.beacon_pending_validator.contains(key) {
            return CommitteeRole::BeaconPending;
        }
        if let Some((shard_id, _)) = self.shard_committee.iter().find(|(_, c)| c.contains(key)) {
            return CommitteeRole::ShardCommittee(*shard_id);
        }
        if let Some((shard_id, _)) = self
            .shard_pending_validator
            .iter()
            .find(|(_, p)| p.contains(key))
        {
            return CommitteeRole::ShardPending(*shard_id);
        }
        if self.candidate_beacon_waiting_for_current_random.contains(key)
            || self.candidate_beacon_waiting_for_next_random.contains(key)
        {
            return CommitteeRole::BeaconCandidate;
        }
        if self.candidate_shard_waiting_for_current_random.contains(key)
            || self.candidate_shard_waiting_for_next_random.contains(key)
        {
            return CommitteeRole::ShardCandidate;
        }
        CommitteeRole::None
    }

    /// Key sits in any committee, pending or candidate list.
    pub fn contains_key(&self, key: &CommitteeKey) -> bool {
        self.role_of(key) != CommitteeRole::None
    }

    /// Every key held by committees, pending and candidate lists.
    pub fn all_keys(&self) -> impl Iterator<Item = &CommitteeKey> {
        self.beacon_committee
            .iter()
            .chain(self.beacon_pending_validator.iter())
            .chain(self.shard_committee.values().flatten())
            .chain(self.shard_pending_validator.values().flatten())
            .chain(self.candidate_beacon_waiting_for_current_random.iter())
            .chain(self.candidate_beacon_waiting_for_next_random.iter())
            .chain(self.candidate_shard_waiting_for_current_random.iter())
            .chain(self.candidate_shard_waiting_for_next_random.iter())
    }

    /// Reject stake instructions whose keys are already known, or staked
    /// twice within `instructions`.
    pub fn check_new_stakers(&self, instructions: &[Instruction]) -> BeaconResult<()> {
        let mut staked = BTreeSet::new();
        for inst in instructions {
            if inst.first().map(String::as_str) != Some(super::instruction::STAKE_ACTION) {
                continue;
            }
            if let DecodedInstruction::Stake { stakers, .. } = DecodedInstruction::parse(inst)? {
                for staker in stakers {
                    if self.contains_key(&staker.key) || !staked.insert(staker.key.clone()) {
                        return Err(BeaconError::DuplicateStakePublicKey(
                            staker.key.to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Capture committees for change detection.
    pub fn committee_snapshot(&self) -> CommitteeSnapshot {
        CommitteeSnapshot {
            beacon_committee: self.beacon_committee.clone(),
            beacon_pending: self.beacon_pending_validator.clone(),
            shard_committee: self.shard_committee.clone(),
            shard_pending: self.shard_pending_validator.clone(),
        }
    }

    /// Pending list length per active shard.
    pub fn pending_count_by_shard(&self) -> BTreeMap<ShardId, usize> {
        (0..self.active_shards)
            .map(|shard_id| {
                let count = self
                    .shard_pending_validator
                    .get(&shard_id)
                    .map_or(0, Vec::len);
                (shard_id, count)
            })
            .collect()
    }

    /// Committee of one shard, empty when unknown.
    pub fn shard_committee_of(&self, shard_id: ShardId) -> &[CommitteeKey] {
        self.shard_committee
            .get(&shard_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether the block after `prev_height` must carry a random instruction.
    pub fn needs_random(&self, prev_height: u64, params: &ChainParams) -> bool {
        prev_height % params.epoch >= params.random_time && !self.is_get_random_number
    }

    /// `block`, built on this state, carries at most one random instruction
    /// and only while one is due.
    pub fn check_random_instructions(
        &self,
        block: &BeaconBlock,
        params: &ChainParams,
    ) -> BeaconResult<()> {
        let height = block.header.height;
        let count = block
            .body
            .instructions
            .iter()
            .filter(|inst| inst.first().map(String::as_str) == Some(RANDOM_ACTION))
            .count();
        if count > 1 {
            return Err(BeaconError::DuplicateRandomInstruction { height, count });
        }
        if count == 1 && !self.needs_random(self.height, params) {
            return Err(BeaconError::UnexpectedRandomInstruction(height));
        }
        Ok(())
    }
}

/// The five state roots a beacon header commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRoots {
    /// `BeaconCommitteeAndValidatorRoot`.
    pub beacon_committee_and_validator: Hash,
    /// `BeaconCandidateRoot`.
    pub beacon_candidate: Hash,
    /// `ShardCandidateRoot`.
    pub shard_candidate: Hash,
    /// `ShardCommitteeAndValidatorRoot`.
    pub shard_committee_and_validator: Hash,
    /// `AutoStakingRoot`.
    pub auto_staking: Hash,
}

impl StateRoots {
    /// Roots declared by `header`.
    pub fn of_header(header: &BeaconHeader) -> Self {
        Self {
            beacon_committee_and_validator: header.beacon_committee_and_validator_root,
            beacon_candidate: header.beacon_candidate_root,
            shard_candidate: header.shard_candidate_root,
            shard_committee_and_validator: header.shard_committee_and_validator_root,
            auto_staking: header.auto_staking_root,
        }
    }

    /// Write the roots into `header`.
    pub fn write_into(&self, header: &mut BeaconHeader) {
        header.beacon_committee_and_validator_root = self.beacon_committee_and_validator;
        header.beacon_candidate_root = self.beacon_candidate;
        header.shard_candidate_root = self.shard_candidate;
        header.shard_committee_and_validator_root = self.shard_committee_and_validator;
        header.auto_staking_root = self.auto_staking;
    }

    /// Compare declared roots (`self`) against computed ones, in header order.
    pub fn verify(&self, computed: &StateRoots) -> BeaconResult<()> {
        let pairs = [
            (
                "BeaconCommitteeAndValidatorRoot",
                self.beacon_committee_and_validator,
                computed.beacon_committee_and_validator,
            ),
            (
                "BeaconCandidateRoot",
                self.beacon_candidate,
                computed.beacon_candidate,
            ),
            (
                "ShardCandidateRoot",
                self.shard_candidate,
                computed.shard_candidate,
            ),
            (
                "ShardCommitteeAndValidatorRoot",
                self.shard_committee_and_validator,
                computed.shard_committee_and_validator,
            ),
            ("AutoStakingRoot", self.auto_staking, computed.auto_staking),
        ];
        for (root, declared, computed) in pairs {
            if declared != computed {
                return Err(BeaconError::RootMismatch {
                    root,
                    declared: declared.into(),
                    computed: computed.into(),
                });
            }
        }
        Ok(())
    }
}

/// `height` opens a new epoch.
pub fn is_epoch_start(height: u64, params: &ChainParams) -> bool {
    height % params.epoch == 1
}

/// Epoch of the block at `height`, given its parent's epoch.
pub fn expected_epoch(height: u64, parent_epoch: u64, params: &ChainParams) -> u64 {
    if is_epoch_start(height, params) {
        parent_epoch + 1
    } else {
        parent_epoch
    }
}

fn key_list_hash(keys: &[CommitteeKey]) -> Hash {
    let mut buf = Vec::new();
    encode_keys(&mut buf, keys);
    keccak256(&buf)
}

fn encode_keys(buf: &mut Vec<u8>, keys: &[CommitteeKey]) {
    buf.extend_from_slice(&(keys.len() as u32).to_le_bytes());
    for key in keys {
        encode_str(buf, key.as_str());
    }
}

fn encode_shard_keys(buf: &mut Vec<u8>, map: &BTreeMap<ShardId, Vec<CommitteeKey>>) {
    buf.extend_from_slice(&(map.len() as u32).to_le_bytes());
    for (shard_id, keys) in map {
        buf.push(*shard_id);
        encode_keys(buf, keys);
    }
}

fn encode_auto_staking(buf: &mut Vec<u8>, map: &BTreeMap<CommitteeKey, bool>) {
    buf.extend_from_slice(&(map.len() as u32).to_le_bytes());
    for (key, flag) in map {
        encode_str(buf, key.as_str());
        buf.push(u8::from(*flag));
    }
}
