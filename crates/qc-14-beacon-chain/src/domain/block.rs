//! # Beacon Blocks
//!
//! Beacon blocks, their shard-state summaries and the shard-to-beacon blocks
//! the producer aggregates. A beacon block is hashed by its header only; the
//! body is bound to the header through `shard_state_hash`,
//! `instruction_hash` and `instruction_merkle_root`.

use super::errors::{BeaconError, BeaconResult};
use super::instruction::Instruction;
use super::keys::CommitteeKey;
use crate::utils::{encode_str, instruction_merkle_root, instructions_hash};
use serde::{Deserialize, Serialize};
use shared_types::{keccak256, Hash, ShardId, ZERO_HASH};
use std::collections::BTreeMap;

/// Consensus type recorded in every header.
pub const BFT_CONSENSUS: &str = "bft";

/// Summary of one shard block as acknowledged by the beacon chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardState {
    /// Shard block height.
    pub height: u64,
    /// Shard block hash.
    pub hash: Hash,
    /// Destination shards of the block's cross-shard outputs.
    pub cross_shard: Vec<ShardId>,
}

/// Beacon block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconHeader {
    /// Block format version.
    pub version: u32,
    /// Beacon height (genesis is 1).
    pub height: u64,
    /// Epoch number (genesis is 1).
    pub epoch: u64,
    /// BFT round the block was produced in.
    pub round: u32,
    /// Producer's committee key.
    pub producer: CommitteeKey,
    /// Parent block hash.
    pub previous_block_hash: Hash,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Consensus type tag.
    pub consensus_type: String,
    /// Flattened hash of the body's instructions.
    pub instruction_hash: Hash,
    /// Hash of the body's shard states.
    pub shard_state_hash: Hash,
    /// Merkle root over the body's instructions.
    pub instruction_merkle_root: Hash,
    /// Root of beacon committee and pending validators after this block.
    pub beacon_committee_and_validator_root: Hash,
    /// Root of beacon candidates after this block.
    pub beacon_candidate_root: Hash,
    /// Root of shard candidates after this block.
    pub shard_candidate_root: Hash,
    /// Root of shard committees and pending validators after this block.
    pub shard_committee_and_validator_root: Hash,
    /// Root of the auto-staking map after this block.
    pub auto_staking_root: Hash,
}

impl BeaconHeader {
    /// Header hash, which is the block hash.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(512);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.epoch.to_le_bytes());
        buf.extend_from_slice(&self.round.to_le_bytes());
        encode_str(&mut buf, self.producer.as_str());
        buf.extend_from_slice(&self.previous_block_hash);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        encode_str(&mut buf, &self.consensus_type);
        for root in [
            &self.instruction_hash,
            &self.shard_state_hash,
            &self.instruction_merkle_root,
            &self.beacon_committee_and_validator_root,
            &self.beacon_candidate_root,
            &self.shard_candidate_root,
            &self.shard_committee_and_validator_root,
            &self.auto_staking_root,
        ] {
            buf.extend_from_slice(root);
        }
        keccak256(&buf)
    }
}

/// Beacon block body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBody {
    /// Shard states per shard, heights ascending.
    pub shard_state: BTreeMap<ShardId, Vec<ShardState>>,
    /// Instructions in application order.
    pub instructions: Vec<Instruction>,
}

impl BeaconBody {
    /// Hash of the shard states, shards ascending.
    pub fn shard_state_hash(&self) -> Hash {
        shard_state_hash(&self.shard_state)
    }

    /// Flattened instruction hash.
    pub fn instruction_hash(&self) -> Hash {
        instructions_hash(&self.instructions)
    }

    /// Instruction merkle root.
    pub fn instruction_merkle_root(&self) -> Hash {
        instruction_merkle_root(&self.instructions)
    }
}

/// Hash a shard-state map. Shards are visited in ascending id order.
pub fn shard_state_hash(shard_state: &BTreeMap<ShardId, Vec<ShardState>>) -> Hash {
    let mut buf = Vec::new();
    for (shard_id, states) in shard_state {
        buf.push(*shard_id);
        buf.extend_from_slice(&(states.len() as u32).to_le_bytes());
        for state in states {
            buf.extend_from_slice(&state.height.to_le_bytes());
            buf.extend_from_slice(&state.hash);
            buf.extend_from_slice(&(state.cross_shard.len() as u32).to_le_bytes());
            buf.extend_from_slice(&state.cross_shard);
        }
    }
    keccak256(&buf)
}

/// A beacon block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlock {
    /// Header.
    pub header: BeaconHeader,
    /// Body.
    pub body: BeaconBody,
}

impl BeaconBlock {
    /// Block hash (header hash).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Block height.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Genesis has no parent.
    pub fn is_genesis(&self) -> bool {
        self.header.height == 1 && self.header.previous_block_hash == ZERO_HASH
    }

    /// Serialize for storage.
    pub fn to_bytes(&self) -> BeaconResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| BeaconError::DecodeBlock(e.to_string()))
    }

    /// Deserialize from storage.
    pub fn from_bytes(bytes: &[u8]) -> BeaconResult<Self> {
        bincode::deserialize(bytes).map_err(|e| BeaconError::DecodeBlock(e.to_string()))
    }

    /// Recompute the three body hashes into the header.
    pub fn seal_body(&mut self) {
        self.header.shard_state_hash = self.body.shard_state_hash();
        self.header.instruction_hash = self.body.instruction_hash();
        self.header.instruction_merkle_root = self.body.instruction_merkle_root();
    }
}

/// Shard-to-beacon block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardToBeaconHeader {
    /// Source shard.
    pub shard_id: ShardId,
    /// Shard block height.
    pub height: u64,
    /// Shard producer.
    pub producer: CommitteeKey,
    /// Beacon height the shard block was built on.
    pub beacon_height: u64,
    /// Shard epoch.
    pub epoch: u64,
    /// Shard BFT round.
    pub round: u32,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Destination shards of cross-shard outputs.
    pub cross_shard: Vec<ShardId>,
    /// Transaction fees collected by the shard block.
    pub tx_fee: u64,
}

impl ShardToBeaconHeader {
    /// Header hash, which is the shard block hash.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(128);
        buf.push(self.shard_id);
        buf.extend_from_slice(&self.height.to_le_bytes());
        encode_str(&mut buf, self.producer.as_str());
        buf.extend_from_slice(&self.beacon_height.to_le_bytes());
        buf.extend_from_slice(&self.epoch.to_le_bytes());
        buf.extend_from_slice(&self.round.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(self.cross_shard.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.cross_shard);
        buf.extend_from_slice(&self.tx_fee.to_le_bytes());
        keccak256(&buf)
    }
}

/// Compact shard block summary sent to the beacon chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardToBeaconBlock {
    /// Header.
    pub header: ShardToBeaconHeader,
    /// Instructions for the beacon chain (stake, swap, stopautostake, metadata).
    pub instructions: Vec<Instruction>,
    /// Aggregated committee signature, opaque to the core.
    pub validation_data: String,
}

impl ShardToBeaconBlock {
    /// Block hash.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// The summary recorded in the beacon body.
    pub fn shard_state(&self) -> ShardState {
        ShardState {
            height: self.header.height,
            hash: self.hash(),
            cross_shard: self.header.cross_shard.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instruction::instruction_from;

    fn header() -> BeaconHeader {
        BeaconHeader {
            version: 1,
            height: 2,
            epoch: 1,
            round: 0,
            producer: CommitteeKey::parse("producer").unwrap(),
            previous_block_hash: [1u8; 32],
            timestamp: 100,
            consensus_type: BFT_CONSENSUS.to_string(),
            instruction_hash: ZERO_HASH,
            shard_state_hash: ZERO_HASH,
            instruction_merkle_root: ZERO_HASH,
            beacon_committee_and_validator_root: ZERO_HASH,
            beacon_candidate_root: ZERO_HASH,
            shard_candidate_root: ZERO_HASH,
            shard_committee_and_validator_root: ZERO_HASH,
            auto_staking_root: ZERO_HASH,
        }
    }

    #[test]
    fn test_header_hash_covers_round() {
        let a = header();
        let mut b = header();
        b.round = 1;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_body_not_in_block_hash_until_sealed() {
        let mut block = BeaconBlock {
            header: header(),
            body: BeaconBody::default(),
        };
        let before = block.hash();
        block
            .body
            .instructions
            .push(instruction_from(&["stopautostake", "k"]));
        assert_eq!(block.hash(), before);
        block.seal_body();
        assert_ne!(block.hash(), before);
    }

    #[test]
    fn test_block_bytes_round_trip() {
        let mut block = BeaconBlock {
            header: header(),
            body: BeaconBody::default(),
        };
        block.body.shard_state.insert(
            1,
            vec![ShardState {
                height: 2,
                hash: [9u8; 32],
                cross_shard: vec![0],
            }],
        );
        let bytes = block.to_bytes().unwrap();
        assert_eq!(BeaconBlock::from_bytes(&bytes).unwrap(), block);
        assert!(matches!(
            BeaconBlock::from_bytes(&[1, 2, 3]),
            Err(BeaconError::DecodeBlock(_))
        ));
    }

    #[test]
    fn test_shard_state_hash_depends_on_cross_shard() {
        let mut a = BTreeMap::new();
        a.insert(
            0,
            vec![ShardState {
                height: 2,
                hash: [1u8; 32],
                cross_shard: vec![],
            }],
        );
        let mut b = a.clone();
        if let Some(states) = b.get_mut(&0) {
            states[0].cross_shard.push(1);
        }
        assert_ne!(shard_state_hash(&a), shard_state_hash(&b));
    }
}
