//! Builders shared by unit tests and the workspace integration tests.

use crate::algorithms::producer_index;
use crate::config::ChainParams;
use crate::domain::{
    expected_epoch, instruction_from, BeaconBlock, BeaconBody, BeaconHeader, BeaconState,
    CommitteeKey, Instruction, ShardToBeaconBlock, ShardToBeaconHeader, BFT_CONSENSUS,
};
use shared_types::{ShardId, ZERO_HASH};

/// Genesis block timestamp.
pub const GENESIS_TIMESTAMP: i64 = 1_600_000_000;

/// Parse a test key.
pub fn key(name: &str) -> CommitteeKey {
    CommitteeKey::parse(name).expect("valid test key")
}

/// Key of the `index`-th genesis beacon committee member.
pub fn beacon_key(index: usize) -> CommitteeKey {
    key(&format!("beacon-{}", index))
}

/// Key of the `index`-th genesis member of `shard_id`'s committee.
pub fn shard_key(shard_id: ShardId, index: usize) -> CommitteeKey {
    key(&format!("shard{}-{}", shard_id, index))
}

/// `stake` instruction for `keys`, every flag set to `auto_staking`.
pub fn stake_instruction(keys: &[&str], role: &str, auto_staking: bool) -> Instruction {
    let n = keys.len();
    let flag = if auto_staking { "true" } else { "false" };
    let tx_ids: Vec<String> = keys.iter().map(|k| format!("tx-{}", k)).collect();
    let receivers: Vec<String> = keys.iter().map(|k| format!("addr-{}", k)).collect();
    instruction_from(&[
        "stake".to_string(),
        keys.join(","),
        role.to_string(),
        tx_ids.join(","),
        receivers.join(","),
        vec![flag; n].join(","),
    ])
}

/// Genesis block seating minimum-size committees.
///
/// The first instruction is the beacon stake; each shard then gets a shard
/// stake followed by its assign instruction.
pub fn genesis_block(params: &ChainParams) -> BeaconBlock {
    let beacon: Vec<String> = (0..params.min_beacon_committee_size)
        .map(|i| beacon_key(i).to_string())
        .collect();
    let beacon_refs: Vec<&str> = beacon.iter().map(String::as_str).collect();
    let mut instructions = vec![stake_instruction(&beacon_refs, "beacon", true)];

    for shard_id in 0..params.active_shards {
        let members: Vec<String> = (0..params.min_shard_committee_size)
            .map(|i| shard_key(shard_id, i).to_string())
            .collect();
        let refs: Vec<&str> = members.iter().map(String::as_str).collect();
        instructions.push(stake_instruction(&refs, "shard", true));
        instructions.push(instruction_from(&[
            "assign".to_string(),
            members.join(","),
            "shard".to_string(),
            shard_id.to_string(),
        ]));
    }

    let mut block = BeaconBlock {
        header: BeaconHeader {
            version: params.block_version,
            height: 1,
            epoch: 1,
            round: 0,
            producer: beacon_key(0),
            previous_block_hash: ZERO_HASH,
            timestamp: GENESIS_TIMESTAMP,
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
            shard_state: Default::default(),
            instructions,
        },
    };
    block.seal_body();
    if let Ok(state) = BeaconState::from_genesis(&block, params) {
        state.roots().write_into(&mut block.header);
    }
    block
}

/// State after the testing genesis block.
pub fn genesis_state() -> BeaconState {
    let params = ChainParams::for_testing();
    BeaconState::from_genesis(&genesis_block(&params), &params).expect("valid genesis")
}

/// Block on top of `state` carrying `instructions`, body sealed, roots
/// left zero.
pub fn next_block(
    state: &BeaconState,
    params: &ChainParams,
    instructions: Vec<Instruction>,
) -> BeaconBlock {
    let height = state.height + 1;
    let index = producer_index(
        state.beacon_committee.len(),
        state.beacon_proposer_index + 1,
        0,
    )
    .expect("non-empty committee");
    let mut block = BeaconBlock {
        header: BeaconHeader {
            version: params.block_version,
            height,
            epoch: expected_epoch(height, state.epoch, params),
            round: 0,
            producer: state.beacon_committee[index].clone(),
            previous_block_hash: state.best_block_hash,
            timestamp: state.best_block_timestamp + 1,
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
            shard_state: Default::default(),
            instructions,
        },
    };
    block.seal_body();
    block
}

/// Like [`next_block`], with the state roots of the resulting state filled
/// in so the block passes post-processing.
pub fn next_rooted_block(
    state: &BeaconState,
    params: &ChainParams,
    instructions: Vec<Instruction>,
) -> BeaconBlock {
    let mut block = next_block(state, params, instructions);
    let mut applied = state.clone();
    applied
        .apply_block(&block, params)
        .expect("test block applies");
    applied.roots().write_into(&mut block.header);
    block
}

/// Shard-to-beacon block signed by the first genesis member of the shard.
pub fn shard_block(
    shard_id: ShardId,
    height: u64,
    instructions: Vec<Instruction>,
) -> ShardToBeaconBlock {
    shard_block_by(shard_id, height, shard_key(shard_id, 0), instructions)
}

/// Shard-to-beacon block produced by `producer`.
pub fn shard_block_by(
    shard_id: ShardId,
    height: u64,
    producer: CommitteeKey,
    instructions: Vec<Instruction>,
) -> ShardToBeaconBlock {
    ShardToBeaconBlock {
        header: ShardToBeaconHeader {
            shard_id,
            height,
            producer,
            beacon_height: 1,
            epoch: 1,
            round: 0,
            timestamp: GENESIS_TIMESTAMP + height as i64,
            cross_shard: vec![],
            tx_fee: 10 * height,
        },
        instructions,
        validation_data: format!("sig-{}-{}", shard_id, height),
    }
}
