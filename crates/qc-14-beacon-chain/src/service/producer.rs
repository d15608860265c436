//! # Block Production
//!
//! Assembles the next beacon block from the best state and the
//! shard-to-beacon pool. The produced block carries its state roots and
//! passes insertion as-is.

use super::{BeaconChain, BuildInputs, InstructionBuilder};
use crate::algorithms::producer_index;
use crate::domain::{
    check_state_invariants, expected_epoch, BeaconBlock, BeaconBody, BeaconError, BeaconHeader,
    BeaconResult, BeaconState, CommitteeKey, DecodedInstruction, Instruction, ShardToBeaconBlock,
    BFT_CONSENSUS,
};
use shared_types::{HexHash, ShardId, ZERO_HASH};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

impl BeaconChain {
    pub(super) async fn produce_block_internal(
        &self,
        producer: &CommitteeKey,
        round: u32,
    ) -> BeaconResult<BeaconBlock> {
        let _guard = self.chain_lock.lock().await;
        let best = self.snapshot().try_clone()?;

        let index = producer_index(
            best.beacon_committee.len(),
            best.beacon_proposer_index + 1,
            round,
        )?;
        let expected = &best.beacon_committee[index];
        if expected != producer {
            return Err(BeaconError::NotProducer {
                expected: expected.to_string(),
                actual: producer.to_string(),
            });
        }

        let height = best.height + 1;
        let shard_blocks = self.select_shard_blocks(&best);
        let random = if best.needs_random(best.height, &self.params) {
            Some(self.fetch_random(&best).await?)
        } else {
            None
        };
        let blacklist = self.slashing.producers_black_list(height);
        let instructions = InstructionBuilder::new(&self.params, &self.handlers).build(
            &best,
            BuildInputs {
                shard_blocks: &shard_blocks,
                blacklist: &blacklist,
                random,
            },
        )?;

        let shard_state = shard_blocks
            .iter()
            .map(|(shard_id, blocks)| {
                (
                    *shard_id,
                    blocks.iter().map(ShardToBeaconBlock::shard_state).collect(),
                )
            })
            .collect();

        let timestamp = self
            .time_source
            .now()
            .max(best.best_block_timestamp + 1);
        let mut block = BeaconBlock {
            header: BeaconHeader {
                version: self.params.block_version,
                height,
                epoch: expected_epoch(height, best.epoch, &self.params),
                round,
                producer: producer.clone(),
                previous_block_hash: best.best_block_hash,
                timestamp,
                consensus_type: BFT_CONSENSUS.to_string(),
                instruction_hash: ZERO_HASH,
                shard_state_hash: ZERO_HASH,
                instruction_merkle_root: ZERO_HASH,
                beacon_committee_and_validator_root: ZERO_HASH,
                beacon_candidate_root: ZERO_HASH,
                shard_candidate_root: ZERO_HASH,
                shard_committee_and_validator_root: ZERO_HASH,
                auto_staking_root: ZERO_HASH,
            },
            body: BeaconBody {
                shard_state,
                instructions,
            },
        };
        block.seal_body();

        let mut derived = best.try_clone()?;
        derived.apply_block(&block, &self.params)?;
        check_state_invariants(&best, &derived)?;
        derived.roots().write_into(&mut block.header);

        info!(
            height,
            round,
            hash = %HexHash::from(block.hash()),
            shards = block.body.shard_state.len(),
            instructions = block.body.instructions.len(),
            "Produced beacon block"
        );
        Ok(block)
    }

    /// Consecutive pooled blocks per active shard, starting right after the
    /// shard's acknowledged height. Stops at a gap, at the first block whose
    /// signature fails, or after `max_s2b_blocks`.
    fn select_shard_blocks(
        &self,
        best: &BeaconState,
    ) -> BTreeMap<ShardId, Vec<ShardToBeaconBlock>> {
        let mut selected = BTreeMap::new();
        for (shard_id, pooled) in self.pool.get_valid_blocks(&best.best_shard_height) {
            if shard_id >= best.active_shards {
                debug!(shard_id, "Skipping blocks of an inactive shard");
                continue;
            }
            let committee = best.shard_committee_of(shard_id);
            let mut next = best
                .best_shard_height
                .get(&shard_id)
                .map_or(2, |height| height + 1);
            let mut blocks = Vec::new();
            for block in pooled {
                if blocks.len() >= self.params.max_s2b_blocks || block.header.height != next {
                    break;
                }
                if !self.verifier.verify(&block, committee) {
                    warn!(
                        shard_id,
                        height = block.header.height,
                        "Shard block failed signature check, stopping"
                    );
                    break;
                }
                next += 1;
                blocks.push(block);
            }
            if !blocks.is_empty() {
                selected.insert(shard_id, blocks);
            }
        }
        selected
    }

    /// Random instruction for the epoch's checkpoint timestamp.
    async fn fetch_random(&self, best: &BeaconState) -> BeaconResult<Instruction> {
        let checkpoint = best.current_random_time_stamp;
        let fetched = self
            .with_oracle_timeout(self.oracle.get_nonce_by_timestamp(checkpoint))
            .await?;
        debug!(
            checkpoint,
            oracle_height = fetched.block_height,
            "Fetched epoch random number"
        );
        Ok(DecodedInstruction::Random {
            nonce: fetched.nonce,
            block_height: fetched.block_height,
            timestamp: checkpoint,
            chain_timestamp: fetched.chain_timestamp,
        }
        .encode())
    }
}
