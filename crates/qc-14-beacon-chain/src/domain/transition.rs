//! # State Transition
//!
//! Applies one beacon block to a (cloned) beacon state:
//!
//! 1. Epoch bookkeeping, best-block fields and producer accounting.
//! 2. Shard tips and cross-shard acknowledgements from the shard states.
//! 3. Instructions, strictly in body order.
//! 4. Epoch advance: random snapshot, then shuffle and assignment once the
//!    epoch's random number is known.
//!
//! Each instruction is validated in full before it touches the state, so a
//! rejected instruction leaves the state exactly as it was.

use super::block::{BeaconBlock, ShardState};
use super::errors::{BeaconError, BeaconResult};
use super::instruction::{ChainRole, DecodedInstruction, Staker, SwapTarget};
use super::keys::CommitteeKey;
use super::state::{is_epoch_start, BeaconState};
use super::value_objects::{BlockEffects, CrossShardAck, InstructionEffect};
use crate::algorithms::{assign_candidates, shuffle};
use crate::config::ChainParams;
use shared_types::ShardId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

impl BeaconState {
    /// Apply `block` on top of this state.
    pub fn apply_block(
        &mut self,
        block: &BeaconBlock,
        params: &ChainParams,
    ) -> BeaconResult<BlockEffects> {
        let header = &block.header;
        self.check_random_instructions(block, params)?;

        if is_epoch_start(header.height, params) {
            self.num_of_blocks_by_producers.clear();
        }
        self.previous_best_block_hash = self.best_block_hash;
        self.best_block_hash = block.hash();
        self.height = header.height;
        self.epoch = header.epoch;
        self.best_block_timestamp = header.timestamp;
        self.best_block_round = header.round;

        *self
            .num_of_blocks_by_producers
            .entry(header.producer.clone())
            .or_insert(0) += 1;
        if let Some(index) = self
            .beacon_committee
            .iter()
            .position(|k| k == &header.producer)
        {
            self.beacon_proposer_index = index;
        }

        let mut effects = BlockEffects {
            cross_shard_acks: self.apply_shard_states(&block.body.shard_state),
            ..Default::default()
        };

        let pending_snapshot = self.pending_count_by_shard();
        for inst in &block.body.instructions {
            let effect = self.apply_instruction(inst)?;
            effects.absorb(effect);
        }

        self.advance_epoch(params, effects.random_applied, &pending_snapshot)?;

        debug!(
            height = self.height,
            epoch = self.epoch,
            instructions = block.body.instructions.len(),
            new_beacon_candidates = effects.new_beacon_candidates.len(),
            new_shard_candidates = effects.new_shard_candidates.len(),
            "Applied beacon block"
        );
        Ok(effects)
    }

    /// Apply one instruction. On error the state is unchanged.
    pub fn apply_instruction(&mut self, instruction: &[String]) -> BeaconResult<InstructionEffect> {
        let mut effect = InstructionEffect::default();
        match DecodedInstruction::parse(instruction)? {
            DecodedInstruction::Stake { role, stakers } => {
                self.ensure_fresh_stakers(&stakers)?;
                for staker in stakers {
                    self.reward_receiver
                        .insert(staker.key.clone(), staker.reward_receiver);
                    self.auto_staking
                        .insert(staker.key.clone(), staker.auto_staking);
                    match role {
                        ChainRole::Beacon => {
                            self.candidate_beacon_waiting_for_next_random
                                .push(staker.key.clone());
                            effect.new_beacon_candidates.push(staker.key);
                        }
                        ChainRole::Shard => {
                            self.candidate_shard_waiting_for_next_random
                                .push(staker.key.clone());
                            effect.new_shard_candidates.push(staker.key);
                        }
                    }
                }
            }
            DecodedInstruction::Swap {
                in_keys,
                out_keys,
                target,
            } => {
                let recandidates = self.apply_swap(&in_keys, &out_keys, target)?;
                match target {
                    SwapTarget::Beacon => effect.new_beacon_candidates = recandidates,
                    SwapTarget::Shard(_) => effect.new_shard_candidates = recandidates,
                }
            }
            DecodedInstruction::StopAutoStake { keys } => {
                for key in keys {
                    if let Some(flag) = self.auto_staking.get_mut(&key) {
                        *flag = false;
                    }
                }
            }
            DecodedInstruction::Random { nonce, .. } => {
                self.current_random_number = nonce;
                self.is_get_random_number = true;
                effect.random_applied = true;
            }
            DecodedInstruction::Assign {
                candidates,
                shard_id,
            } => {
                if shard_id >= self.active_shards {
                    return Err(BeaconError::InvalidAssign(format!(
                        "shard {} out of range",
                        shard_id
                    )));
                }
                if let Some(key) = candidates
                    .iter()
                    .find(|k| !self.candidate_shard_waiting_for_current_random.contains(k))
                {
                    return Err(BeaconError::InvalidAssign(format!(
                        "{} is not waiting for the current random number",
                        key
                    )));
                }
            }
            DecodedInstruction::Metadata { .. } => {}
        }
        Ok(effect)
    }

    fn ensure_fresh_stakers(&self, stakers: &[Staker]) -> BeaconResult<()> {
        let mut seen = BTreeSet::new();
        for staker in stakers {
            if self.contains_key(&staker.key) || !seen.insert(&staker.key) {
                return Err(BeaconError::DuplicateStakePublicKey(staker.key.to_string()));
            }
        }
        Ok(())
    }

    /// Rotate a committee. Returns swapped-out keys that re-entered the
    /// candidate pool through auto-staking.
    fn apply_swap(
        &mut self,
        in_keys: &[CommitteeKey],
        out_keys: &[CommitteeKey],
        target: SwapTarget,
    ) -> BeaconResult<Vec<CommitteeKey>> {
        if let SwapTarget::Shard(shard_id) = target {
            if shard_id >= self.active_shards {
                return Err(BeaconError::InvalidSwap(format!(
                    "shard {} out of range",
                    shard_id
                )));
            }
        }

        let (committee, pending) = match target {
            SwapTarget::Beacon => (
                self.beacon_committee.as_slice(),
                self.beacon_pending_validator.as_slice(),
            ),
            SwapTarget::Shard(shard_id) => (
                self.shard_committee.get(&shard_id).map_or(&[][..], Vec::as_slice),
                self.shard_pending_validator
                    .get(&shard_id)
                    .map_or(&[][..], Vec::as_slice),
            ),
        };

        if let Some(key) = in_keys.iter().find(|k| !pending.contains(k)) {
            return Err(BeaconError::InvalidSwap(format!("{} is not pending", key)));
        }
        let mut from_committee = Vec::new();
        let mut from_pending = Vec::new();
        for key in out_keys {
            if in_keys.contains(key) {
                return Err(BeaconError::InvalidSwap(format!(
                    "{} both enters and leaves",
                    key
                )));
            }
            if committee.contains(key) {
                from_committee.push(key.clone());
            } else if pending.contains(key) {
                from_pending.push(key.clone());
            } else {
                return Err(BeaconError::InvalidSwap(format!(
                    "{} is neither committee nor pending",
                    key
                )));
            }
        }

        let mut new_committee: Vec<CommitteeKey> = committee
            .iter()
            .filter(|k| !from_committee.contains(k))
            .cloned()
            .collect();
        new_committee.extend(in_keys.iter().cloned());
        let new_pending: Vec<CommitteeKey> = pending
            .iter()
            .filter(|k| !in_keys.contains(k) && !from_pending.contains(k))
            .cloned()
            .collect();

        match target {
            SwapTarget::Beacon => {
                self.beacon_committee = new_committee;
                self.beacon_pending_validator = new_pending;
            }
            SwapTarget::Shard(shard_id) => {
                self.shard_committee.insert(shard_id, new_committee);
                self.shard_pending_validator.insert(shard_id, new_pending);
            }
        }

        // Evicted pending validators leave the system.
        for key in &from_pending {
            self.auto_staking.remove(key);
            self.reward_receiver.remove(key);
        }

        let mut recandidates = Vec::new();
        for key in from_committee {
            if self.auto_staking.get(&key).copied().unwrap_or(false) {
                match target {
                    SwapTarget::Beacon => self
                        .candidate_beacon_waiting_for_next_random
                        .push(key.clone()),
                    SwapTarget::Shard(_) => self
                        .candidate_shard_waiting_for_next_random
                        .push(key.clone()),
                }
                recandidates.push(key);
            } else {
                self.auto_staking.remove(&key);
                self.reward_receiver.remove(&key);
            }
        }
        Ok(recandidates)
    }

    /// Record shard tips and advance cross-shard heights.
    fn apply_shard_states(
        &mut self,
        shard_states: &BTreeMap<ShardId, Vec<ShardState>>,
    ) -> Vec<CrossShardAck> {
        let mut acks = Vec::new();
        for (shard_id, states) in shard_states {
            for state in states {
                self.best_shard_height.insert(*shard_id, state.height);
                self.best_shard_hash.insert(*shard_id, state.hash);
                for to in &state.cross_shard {
                    let last = self
                        .last_cross_shard_state
                        .entry(*shard_id)
                        .or_default()
                        .entry(*to)
                        .or_insert(0);
                    if state.height > *last {
                        acks.push(CrossShardAck {
                            from: *shard_id,
                            to: *to,
                            last_height: *last,
                            wait_height: state.height,
                        });
                        *last = state.height;
                    }
                }
            }
        }
        acks
    }

    /// Epoch boundary logic, run after the block's instructions.
    fn advance_epoch(
        &mut self,
        params: &ChainParams,
        random_applied: bool,
        pending_snapshot: &BTreeMap<ShardId, usize>,
    ) -> BeaconResult<()> {
        let in_epoch = self.height % params.epoch;

        if in_epoch == 1 && self.height != 1 {
            self.is_get_random_number = false;
        }

        if in_epoch == params.random_time {
            self.current_random_time_stamp = self.best_block_timestamp;
            let beacon_next = std::mem::take(&mut self.candidate_beacon_waiting_for_next_random);
            let shard_next = std::mem::take(&mut self.candidate_shard_waiting_for_next_random);
            self.candidate_beacon_waiting_for_current_random
                .extend(beacon_next);
            self.candidate_shard_waiting_for_current_random
                .extend(shard_next);
        }

        if random_applied {
            let seed = self.current_random_number;
            let assignment = assign_candidates(
                &self.candidate_shard_waiting_for_current_random,
                pending_snapshot,
                seed,
                params.assign_offset,
                self.active_shards,
            )?;
            for (shard_id, keys) in assignment.assigned {
                self.shard_pending_validator
                    .entry(shard_id)
                    .or_default()
                    .extend(keys);
            }
            self.candidate_shard_waiting_for_next_random
                .extend(assignment.remaining);

            let beacon = shuffle(&self.candidate_beacon_waiting_for_current_random, seed);
            self.beacon_pending_validator.extend(beacon);

            self.candidate_shard_waiting_for_current_random.clear();
            self.candidate_beacon_waiting_for_current_random.clear();
            debug!(height = self.height, seed, "Assigned candidates with epoch random");
        }
        Ok(())
    }
}
