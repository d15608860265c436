//! # Instruction Builder
//!
//! Derives the instruction list of the next beacon block from the parent
//! state and the shard-to-beacon blocks it includes. The producer uses it to
//! fill a new block; the pre-sign validator runs it again and compares
//! instruction hashes, so the output depends on its inputs only.
//!
//! Order:
//!
//! 1. beacon reward (epoch start)
//! 2. accepted-block rewards, one per shard block
//! 3. handler instructions (PDE, bridge)
//! 4. shard swaps, for shards that sent blocks
//! 5. beacon swap (epoch start)
//! 6. stakes, shard pool then beacon pool
//! 7. stop-auto-stake
//! 8. random, then one assign per shard

use crate::algorithms::{assign_candidates, compute_swap};
use crate::config::ChainParams;
use crate::domain::{
    is_epoch_start, BeaconError, BeaconResult, BeaconState, ChainRole, CommitteeKey,
    DecodedInstruction, Instruction, ShardToBeaconBlock, SwapTarget,
};
use crate::ports::InstructionHandler;
use shared_types::ShardId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Metadata type of the per-epoch beacon reward instruction.
pub const BEACON_REWARD_META: u32 = 44;

/// Metadata type of the accepted shard block reward instruction.
pub const ACCEPTED_BLOCK_REWARD_META: u32 = 37;

/// Everything the builder reads besides the parent state.
pub struct BuildInputs<'a> {
    /// Shard-to-beacon blocks included in the block, heights ascending.
    pub shard_blocks: &'a BTreeMap<ShardId, Vec<ShardToBeaconBlock>>,
    /// Producers barred from committees at the new height.
    pub blacklist: &'a BTreeSet<CommitteeKey>,
    /// The block's random instruction, when the epoch needs one.
    pub random: Option<Instruction>,
}

/// Stateless instruction builder.
pub struct InstructionBuilder<'a> {
    params: &'a ChainParams,
    handlers: &'a [Arc<dyn InstructionHandler>],
}

impl<'a> InstructionBuilder<'a> {
    /// Builder over `params` and the registered handlers.
    pub fn new(params: &'a ChainParams, handlers: &'a [Arc<dyn InstructionHandler>]) -> Self {
        Self { params, handlers }
    }

    /// Instructions of the block on top of `parent`.
    pub fn build(
        &self,
        parent: &BeaconState,
        inputs: BuildInputs<'_>,
    ) -> BeaconResult<Vec<Instruction>> {
        let height = parent.height + 1;
        let epoch_start = is_epoch_start(height, self.params);
        let mut out = Vec::new();

        if epoch_start && height > 1 {
            out.push(beacon_reward_instruction(parent)?);
        }

        let mut handler_input = Vec::new();
        let mut shard_stakes = Vec::new();
        let mut beacon_stakes = Vec::new();
        let mut stop_auto_stake = Vec::new();

        for (shard_id, blocks) in inputs.shard_blocks {
            for block in blocks {
                out.push(accepted_block_reward_instruction(block));
                for inst in &block.instructions {
                    match DecodedInstruction::parse(inst) {
                        Ok(DecodedInstruction::Stake { role, .. }) => match role {
                            ChainRole::Shard => shard_stakes.push(inst.clone()),
                            ChainRole::Beacon => beacon_stakes.push(inst.clone()),
                        },
                        Ok(DecodedInstruction::StopAutoStake { .. }) => {
                            stop_auto_stake.push(inst.clone())
                        }
                        Ok(DecodedInstruction::Metadata { .. }) => {
                            handler_input.push((*shard_id, inst.clone()))
                        }
                        Ok(other) => debug!(
                            shard_id,
                            action = %other.action(),
                            "Ignoring shard instruction"
                        ),
                        Err(e) => warn!(
                            shard_id,
                            shard_height = block.header.height,
                            error = %e,
                            "Dropping malformed shard instruction"
                        ),
                    }
                }
            }
        }

        for handler in self.handlers {
            let built = handler.build_instructions(height, &handler_input);
            debug!(handler = handler.name(), count = built.len(), "Handler instructions");
            out.extend(built);
        }

        for shard_id in inputs.shard_blocks.keys() {
            if let Some(inst) = self.shard_swap(parent, *shard_id, inputs.blacklist)? {
                out.push(inst);
            }
        }
        if epoch_start {
            if let Some(inst) = self.beacon_swap(parent, inputs.blacklist)? {
                out.push(inst);
            }
        }

        let mut staked = BTreeSet::new();
        for inst in shard_stakes.into_iter().chain(beacon_stakes) {
            if fresh_stake(parent, &inst, &mut staked) {
                out.push(inst);
            } else {
                warn!(height, "Dropping stake of an already known key");
            }
        }
        out.extend(stop_auto_stake);

        if let Some(random) = inputs.random {
            let nonce = match DecodedInstruction::parse(&random)? {
                DecodedInstruction::Random { nonce, .. } => nonce,
                other => {
                    return Err(BeaconError::InvalidState(format!(
                        "expected random instruction, got {}",
                        other.action()
                    )))
                }
            };
            out.push(random);
            out.extend(self.assign_instructions(parent, nonce)?);
        }

        Ok(out)
    }

    fn shard_swap(
        &self,
        parent: &BeaconState,
        shard_id: ShardId,
        blacklist: &BTreeSet<CommitteeKey>,
    ) -> BeaconResult<Option<Instruction>> {
        if shard_id >= parent.active_shards {
            return Ok(None);
        }
        let pending = parent
            .shard_pending_validator
            .get(&shard_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let outcome = compute_swap(
            pending,
            parent.shard_committee_of(shard_id),
            self.params.max_shard_committee_size,
            self.params.min_shard_committee_size,
            self.params.offset,
            blacklist,
            self.params.swap_offset,
        )?;
        if outcome.is_noop() {
            return Ok(None);
        }
        Ok(Some(
            DecodedInstruction::Swap {
                in_keys: outcome.swapped_in.clone(),
                out_keys: outcome.out_keys(),
                target: SwapTarget::Shard(shard_id),
            }
            .encode(),
        ))
    }

    fn beacon_swap(
        &self,
        parent: &BeaconState,
        blacklist: &BTreeSet<CommitteeKey>,
    ) -> BeaconResult<Option<Instruction>> {
        let outcome = compute_swap(
            &parent.beacon_pending_validator,
            &parent.beacon_committee,
            self.params.max_beacon_committee_size,
            self.params.min_beacon_committee_size,
            self.params.offset,
            blacklist,
            self.params.swap_offset,
        )?;
        if outcome.is_noop() {
            return Ok(None);
        }
        Ok(Some(
            DecodedInstruction::Swap {
                in_keys: outcome.swapped_in.clone(),
                out_keys: outcome.out_keys(),
                target: SwapTarget::Beacon,
            }
            .encode(),
        ))
    }

    /// Assign instructions mirroring the assignment the state transition
    /// performs when the random number lands.
    fn assign_instructions(
        &self,
        parent: &BeaconState,
        seed: i64,
    ) -> BeaconResult<Vec<Instruction>> {
        let assignment = assign_candidates(
            &parent.candidate_shard_waiting_for_current_random,
            &parent.pending_count_by_shard(),
            seed,
            self.params.assign_offset,
            parent.active_shards,
        )?;
        Ok(assignment
            .assigned
            .into_iter()
            .map(|(shard_id, candidates)| {
                DecodedInstruction::Assign {
                    candidates,
                    shard_id,
                }
                .encode()
            })
            .collect())
    }
}

/// `["44", epoch, {producer: blocks}]` for the epoch that just ended.
fn beacon_reward_instruction(parent: &BeaconState) -> BeaconResult<Instruction> {
    let counts = serde_json::to_string(&parent.num_of_blocks_by_producers)
        .map_err(|e| BeaconError::InvalidState(e.to_string()))?;
    Ok(vec![
        BEACON_REWARD_META.to_string(),
        parent.epoch.to_string(),
        counts,
    ])
}

/// `["37", shard_id, shard_height, tx_fee]`.
fn accepted_block_reward_instruction(block: &ShardToBeaconBlock) -> Instruction {
    vec![
        ACCEPTED_BLOCK_REWARD_META.to_string(),
        block.header.shard_id.to_string(),
        block.header.height.to_string(),
        block.header.tx_fee.to_string(),
    ]
}

/// Stake whose keys are unknown to `parent` and not staked earlier in the
/// block. Accepted keys are added to `staked`.
fn fresh_stake(
    parent: &BeaconState,
    inst: &Instruction,
    staked: &mut BTreeSet<CommitteeKey>,
) -> bool {
    let Ok(DecodedInstruction::Stake { stakers, .. }) = DecodedInstruction::parse(inst) else {
        return false;
    };
    let mut local = BTreeSet::new();
    for staker in &stakers {
        if parent.contains_key(&staker.key)
            || staked.contains(&staker.key)
            || !local.insert(staker.key.clone())
        {
            return false;
        }
    }
    staked.extend(local);
    true
}
