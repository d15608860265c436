//! # Block Validation
//!
//! Stateless beacon block checks. Storage, pool and oracle lookups stay in
//! the service; everything here reads only its arguments.

use crate::algorithms::producer_index;
use crate::config::ChainParams;
use crate::domain::{
    expected_epoch, BeaconBlock, BeaconError, BeaconResult, BeaconState, DecodedInstruction,
    Instruction, StateRoots, RANDOM_ACTION,
};
use shared_types::HexHash;

/// Beacon block validator.
pub struct BlockValidator;

impl BlockValidator {
    /// Header version matches the chain's block version.
    pub fn validate_version(block: &BeaconBlock, params: &ChainParams) -> BeaconResult<()> {
        if block.header.version != params.block_version {
            return Err(BeaconError::WrongVersion {
                expected: params.block_version,
                actual: block.header.version,
            });
        }
        Ok(())
    }

    /// Height, epoch and timestamp continue `parent`.
    pub fn validate_parent(
        block: &BeaconBlock,
        parent: &BeaconBlock,
        params: &ChainParams,
    ) -> BeaconResult<()> {
        let header = &block.header;
        if header.height != parent.header.height + 1 {
            return Err(BeaconError::WrongBlockHeight {
                expected: parent.header.height + 1,
                actual: header.height,
            });
        }
        let epoch = expected_epoch(header.height, parent.header.epoch, params);
        if header.epoch != epoch {
            return Err(BeaconError::WrongEpoch {
                expected: epoch,
                actual: header.epoch,
            });
        }
        if header.timestamp <= parent.header.timestamp {
            return Err(BeaconError::WrongTimestamp {
                block: header.timestamp,
                parent: parent.header.timestamp,
            });
        }
        Ok(())
    }

    /// Shard-state hash, instruction hash and instruction merkle root match
    /// the body.
    pub fn validate_body_hashes(block: &BeaconBlock) -> BeaconResult<()> {
        let header = &block.header;
        let checks = [
            (
                "ShardStateHash",
                header.shard_state_hash,
                block.body.shard_state_hash(),
            ),
            (
                "InstructionHash",
                header.instruction_hash,
                block.body.instruction_hash(),
            ),
            (
                "InstructionMerkleRoot",
                header.instruction_merkle_root,
                block.body.instruction_merkle_root(),
            ),
        ];
        for (field, declared, computed) in checks {
            if declared != computed {
                return Err(BeaconError::HeaderHashMismatch {
                    field,
                    declared: HexHash::from(declared),
                    computed: HexHash::from(computed),
                });
            }
        }
        Ok(())
    }

    /// Shard states of one shard are consecutive.
    pub fn validate_shard_state_sequence(block: &BeaconBlock) -> BeaconResult<()> {
        for (shard_id, states) in &block.body.shard_state {
            for pair in states.windows(2) {
                if pair[1].height != pair[0].height + 1 {
                    return Err(BeaconError::ShardStateSequence {
                        shard_id: *shard_id,
                        expected: pair[0].height + 1,
                        actual: pair[1].height,
                    });
                }
            }
        }
        Ok(())
    }

    /// Every pre-processing check that needs no storage.
    pub fn validate_pre_processing(
        block: &BeaconBlock,
        parent: &BeaconBlock,
        params: &ChainParams,
    ) -> BeaconResult<()> {
        Self::validate_version(block, params)?;
        Self::validate_parent(block, parent, params)?;
        Self::validate_body_hashes(block)?;
        Self::validate_shard_state_sequence(block)
    }

    /// The block extends `best`.
    pub fn validate_best_state(
        block: &BeaconBlock,
        best: &BeaconState,
        params: &ChainParams,
    ) -> BeaconResult<()> {
        let header = &block.header;

        let index = producer_index(
            best.beacon_committee.len(),
            best.beacon_proposer_index + 1,
            header.round,
        )?;
        let expected_producer = &best.beacon_committee[index];
        if &header.producer != expected_producer {
            return Err(BeaconError::ProducerMismatch {
                expected: expected_producer.to_string(),
                actual: header.producer.to_string(),
            });
        }

        if header.previous_block_hash != best.best_block_hash {
            return Err(BeaconError::WrongParentHash {
                expected: best.best_block_hash.into(),
                actual: header.previous_block_hash.into(),
            });
        }
        if header.height != best.height + 1 {
            return Err(BeaconError::WrongBlockHeight {
                expected: best.height + 1,
                actual: header.height,
            });
        }
        let epoch = expected_epoch(header.height, best.epoch, params);
        if header.epoch != epoch {
            return Err(BeaconError::WrongEpoch {
                expected: epoch,
                actual: header.epoch,
            });
        }

        for (shard_id, states) in &block.body.shard_state {
            let Some(first) = states.first() else {
                continue;
            };
            // A shard seen for the first time starts after its genesis.
            let expected = best
                .best_shard_height
                .get(shard_id)
                .map_or(2, |height| height + 1);
            if first.height != expected {
                return Err(BeaconError::ShardStateHeight {
                    shard_id: *shard_id,
                    expected,
                    actual: first.height,
                });
            }
        }

        best.check_random_instructions(block, params)?;
        best.check_new_stakers(&block.body.instructions)
    }

    /// State roots declared by the header match the derived state.
    pub fn validate_roots(block: &BeaconBlock, derived: &BeaconState) -> BeaconResult<()> {
        StateRoots::of_header(&block.header).verify(&derived.roots())
    }
}

/// The block's random instruction, if it carries one.
pub fn random_instruction(block: &BeaconBlock) -> Option<&Instruction> {
    block
        .body
        .instructions
        .iter()
        .find(|inst| inst.first().map(String::as_str) == Some(RANDOM_ACTION))
}

/// Nonce of a random instruction.
pub fn random_nonce(instruction: &Instruction) -> BeaconResult<i64> {
    match DecodedInstruction::parse(instruction)? {
        DecodedInstruction::Random { nonce, .. } => Ok(nonce),
        other => Err(BeaconError::InvalidState(format!(
            "expected random instruction, got {}",
            other.action()
        ))),
    }
}
