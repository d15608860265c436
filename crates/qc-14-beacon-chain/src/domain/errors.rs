//! # Domain Errors
//!
//! Error types for the beacon chain subsystem.
//!
//! Three layers, innermost first:
//! - [`InstructionError`]: an instruction string array has the wrong shape.
//! - [`CommitteeError`]: committee math was called with unusable arguments.
//! - [`BeaconError`]: everything the validator, producer and controller report.
//!
//! Every [`BeaconError`] maps to one [`ErrorKind`]; the chain controller
//! branches on the kind, never on the message.

use shared_types::{HexHash, ShardId, StorageError};
use thiserror::Error;

/// Result alias for beacon operations.
pub type BeaconResult<T> = Result<T, BeaconError>;

/// Instruction codec errors. Always local to one instruction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstructionError {
    /// Instruction has no action tag.
    #[error("Empty instruction")]
    Empty,

    /// Action tag is neither a known action nor a numeric metadata type.
    #[error("Unknown instruction action: {0}")]
    UnknownAction(String),

    /// Wrong number of elements for the action.
    #[error("Instruction {action} expects {expected} elements, got {actual}")]
    WrongLength {
        /// Action tag.
        action: String,
        /// Expected element count.
        expected: usize,
        /// Actual element count.
        actual: usize,
    },

    /// Parallel comma-separated lists of a stake instruction differ in length.
    #[error("Stake lists length mismatch: {keys} keys, {tx_ids} tx ids, {receivers} receivers, {flags} auto-stake flags")]
    StakeListMismatch {
        /// Public keys.
        keys: usize,
        /// Staking transaction ids.
        tx_ids: usize,
        /// Reward receivers.
        receivers: usize,
        /// Auto-staking flags.
        flags: usize,
    },

    /// Role element is not `shard` / `beacon` (or not allowed for the action).
    #[error("Invalid role for {action}: {role}")]
    InvalidRole {
        /// Action tag.
        action: String,
        /// Offending role string.
        role: String,
    },

    /// Both lists of a swap instruction are empty.
    #[error("Swap instruction has neither in nor out keys")]
    EmptySwap,

    /// A list that must not be empty is empty.
    #[error("Empty {0} list")]
    EmptyList(&'static str),

    /// A numeric field failed to parse.
    #[error("Invalid number in field {field}: {value}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// Auto-staking flag is not `true` / `false`.
    #[error("Invalid auto-staking flag: {0}")]
    InvalidFlag(String),

    /// A list item is empty or contains a separator or whitespace.
    #[error("Invalid list item: {0:?}")]
    InvalidItem(String),
}

/// Committee math errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommitteeError {
    /// Committee bounds are unusable.
    #[error("Invalid committee bounds: min {min}, max {max}")]
    InvalidBounds {
        /// Minimum size.
        min: usize,
        /// Maximum size.
        max: usize,
    },

    /// An offset parameter is zero.
    #[error("{0} can't be zero")]
    ZeroOffset(&'static str),

    /// Input committee is already outside its bounds.
    #[error("Committee size {size} outside bounds [{min}, {max}]")]
    SizeOutOfBounds {
        /// Current size.
        size: usize,
        /// Minimum size.
        min: usize,
        /// Maximum size.
        max: usize,
    },

    /// No shards to assign candidates to.
    #[error("Active shard count can't be zero")]
    NoActiveShards,

    /// Committee is empty, so no producer can be selected.
    #[error("Empty committee")]
    EmptyCommittee,

    /// The same key appears twice in a list that must be unique.
    #[error("Duplicate key in committee input: {0}")]
    DuplicateKey(String),
}

/// Error taxonomy used by the controller to decide sync / revert behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad instruction shape, undecodable bytes, header hash mismatch.
    MalformedInput,
    /// Block does not extend the current best state.
    ConsensusIncompatible,
    /// Parent block or shard-to-beacon blocks are missing.
    MissingDependency,
    /// Randomness oracle failed or timed out.
    ExternalOracle,
    /// Storage batch write or read failed.
    Storage,
    /// A post-apply invariant does not hold.
    InvariantViolation,
}

/// Beacon chain error types.
#[derive(Debug, Error)]
pub enum BeaconError {
    // --- Malformed input ---
    /// Instruction could not be parsed.
    #[error("Malformed instruction: {0}")]
    Instruction(#[from] InstructionError),

    /// Committee math rejected its input.
    #[error("Committee computation failed: {0}")]
    Committee(#[from] CommitteeError),

    /// Header version differs from the chain's block version.
    #[error("Wrong block version: expected {expected}, got {actual}")]
    WrongVersion {
        /// Expected version.
        expected: u32,
        /// Header version.
        actual: u32,
    },

    /// Stored block bytes could not be decoded.
    #[error("Block decoding failed: {0}")]
    DecodeBlock(String),

    /// Recomputed header field differs from the declared one.
    #[error("{field} mismatch: header {declared}, computed {computed}")]
    HeaderHashMismatch {
        /// Header field name.
        field: &'static str,
        /// Value carried by the header.
        declared: HexHash,
        /// Value recomputed from the body.
        computed: HexHash,
    },

    /// Shard states for one shard are not consecutive within the block.
    #[error("Shard {shard_id} state sequence broken: expected height {expected}, got {actual}")]
    ShardStateSequence {
        /// Shard.
        shard_id: ShardId,
        /// Expected height.
        expected: u64,
        /// Actual height.
        actual: u64,
    },

    /// Swap instruction references keys that are not where it claims.
    #[error("Invalid swap instruction: {0}")]
    InvalidSwap(String),

    /// Assign instruction references unknown candidates or shards.
    #[error("Invalid assign instruction: {0}")]
    InvalidAssign(String),

    /// Configuration is unusable.
    #[error("Invalid chain params: {0}")]
    InvalidParams(String),

    // --- Consensus incompatible ---
    /// Block height does not extend the parent / best state.
    #[error("Wrong block height: expected {expected}, got {actual}")]
    WrongBlockHeight {
        /// Expected height.
        expected: u64,
        /// Actual height.
        actual: u64,
    },

    /// Block epoch breaks epoch continuity.
    #[error("Wrong epoch: expected {expected}, got {actual}")]
    WrongEpoch {
        /// Expected epoch.
        expected: u64,
        /// Actual epoch.
        actual: u64,
    },

    /// Block timestamp is not after its parent.
    #[error("Wrong timestamp: block {block} <= parent {parent}")]
    WrongTimestamp {
        /// Block timestamp.
        block: i64,
        /// Parent timestamp.
        parent: i64,
    },

    /// Declared producer is not the expected one.
    #[error("Producer mismatch: expected {expected}, got {actual}")]
    ProducerMismatch {
        /// Expected producer key.
        expected: String,
        /// Declared producer key.
        actual: String,
    },

    /// Previous block hash is not the best block.
    #[error("Wrong parent: best block {expected}, header points at {actual}")]
    WrongParentHash {
        /// Best block hash.
        expected: HexHash,
        /// Header's previous hash.
        actual: HexHash,
    },

    /// First shard state height does not follow the best shard height.
    #[error("Shard {shard_id} state height: expected {expected}, got {actual}")]
    ShardStateHeight {
        /// Shard.
        shard_id: ShardId,
        /// Expected height.
        expected: u64,
        /// Actual height.
        actual: u64,
    },

    /// A newly staked key already exists somewhere in the state.
    #[error("Public key already staked: {0}")]
    DuplicateStakePublicKey(String),

    /// Block is already stored.
    #[error("Duplicate block: {0}")]
    DuplicateBlock(HexHash),

    /// Re-derived instruction set differs from the block's.
    #[error("Instruction set mismatch for signing: block {declared}, derived {derived}")]
    InstructionSetMismatch {
        /// Hash of the block's instructions.
        declared: HexHash,
        /// Hash of the re-derived instructions.
        derived: HexHash,
    },

    /// Block lacks the random instruction its height requires.
    #[error("Missing random instruction at height {0}")]
    MissingRandomInstruction(u64),

    /// Block carries a random instruction outside the random window or
    /// after the epoch's random number was already set.
    #[error("Unexpected random instruction at height {0}")]
    UnexpectedRandomInstruction(u64),

    /// Block carries more than one random instruction.
    #[error("Block at height {height} carries {count} random instructions")]
    DuplicateRandomInstruction {
        /// Block height.
        height: u64,
        /// Random instructions found.
        count: usize,
    },

    /// Caller is not the producer for this height and round.
    #[error("Not the producer: expected {expected}, caller {actual}")]
    NotProducer {
        /// Expected producer key.
        expected: String,
        /// Caller key.
        actual: String,
    },

    // --- Missing dependency ---
    /// Parent block is not in storage.
    #[error("Fetch beacon block {hash} failed: {reason}")]
    FetchBeaconBlock {
        /// Missing hash.
        hash: HexHash,
        /// Underlying reason.
        reason: String,
    },

    /// Pool does not hold the shard-to-beacon blocks the block references.
    #[error("Shard {shard_id}: need shard-to-beacon blocks up to height {required}, pool has up to {available}")]
    NotEnoughShardToBeaconBlocks {
        /// Shard.
        shard_id: ShardId,
        /// Highest height required.
        required: u64,
        /// Highest consecutive height available.
        available: u64,
    },

    /// Shard-to-beacon block failed committee signature validation.
    #[error("Shard {shard_id} block {height} failed committee signature validation")]
    ShardBlockSignature {
        /// Shard.
        shard_id: ShardId,
        /// Shard block height.
        height: u64,
    },

    /// No backup snapshot to revert to.
    #[error("No backup beacon state to revert to")]
    MissingBackup,

    // --- External oracle ---
    /// Oracle call exceeded `BlockMaxCreateTime`.
    #[error("Randomness oracle timed out after {0}ms")]
    RandomnessTimeout(u64),

    /// Oracle call failed.
    #[error("Randomness oracle error: {0}")]
    Oracle(String),

    /// Oracle rejected the block's random nonce.
    #[error("Random nonce {0} rejected by oracle")]
    RandomNonceRejected(i64),

    // --- Storage ---
    /// Storage read or batch write failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Invariant violation ---
    /// A recomputed root does not match the header.
    #[error("{root} mismatch: header {declared}, state {computed}")]
    RootMismatch {
        /// Root name.
        root: &'static str,
        /// Header value.
        declared: HexHash,
        /// Recomputed value.
        computed: HexHash,
    },

    /// A zero-value state was cloned or used.
    #[error("Beacon state is empty (not initialized)")]
    EmptyState,

    /// State invariant does not hold.
    #[error("State invariant violated: {0}")]
    InvalidState(String),
}

impl BeaconError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Instruction(_)
            | Self::Committee(_)
            | Self::WrongVersion { .. }
            | Self::DecodeBlock(_)
            | Self::HeaderHashMismatch { .. }
            | Self::ShardStateSequence { .. }
            | Self::InvalidSwap(_)
            | Self::InvalidAssign(_)
            | Self::InvalidParams(_) => ErrorKind::MalformedInput,

            Self::WrongBlockHeight { .. }
            | Self::WrongEpoch { .. }
            | Self::WrongTimestamp { .. }
            | Self::ProducerMismatch { .. }
            | Self::WrongParentHash { .. }
            | Self::ShardStateHeight { .. }
            | Self::DuplicateStakePublicKey(_)
            | Self::DuplicateBlock(_)
            | Self::InstructionSetMismatch { .. }
            | Self::MissingRandomInstruction(_)
            | Self::UnexpectedRandomInstruction(_)
            | Self::DuplicateRandomInstruction { .. }
            | Self::NotProducer { .. } => ErrorKind::ConsensusIncompatible,

            Self::FetchBeaconBlock { .. }
            | Self::NotEnoughShardToBeaconBlocks { .. }
            | Self::ShardBlockSignature { .. }
            | Self::MissingBackup => ErrorKind::MissingDependency,

            Self::RandomnessTimeout(_) | Self::Oracle(_) | Self::RandomNonceRejected(_) => {
                ErrorKind::ExternalOracle
            }

            Self::Storage(_) => ErrorKind::Storage,

            Self::RootMismatch { .. } | Self::EmptyState | Self::InvalidState(_) => {
                ErrorKind::InvariantViolation
            }
        }
    }

    /// Parent block is absent: the controller requests a sync.
    pub fn is_missing_parent(&self) -> bool {
        matches!(self, Self::FetchBeaconBlock { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stake_mismatch_message() {
        let err = InstructionError::StakeListMismatch {
            keys: 3,
            tx_ids: 3,
            receivers: 2,
            flags: 3,
        };
        assert!(err.to_string().contains("2 receivers"));
    }

    #[test]
    fn test_instruction_error_is_malformed_input() {
        let err: BeaconError = InstructionError::EmptySwap.into();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn test_wrong_epoch_is_consensus_incompatible() {
        let err = BeaconError::WrongEpoch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.kind(), ErrorKind::ConsensusIncompatible);
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn test_fetch_block_is_missing_parent() {
        let err = BeaconError::FetchBeaconBlock {
            hash: [1u8; 32].into(),
            reason: "not found".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::MissingDependency);
        assert!(err.is_missing_parent());
        assert!(!BeaconError::MissingBackup.is_missing_parent());
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: BeaconError = StorageError::BatchFailed("io".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_root_mismatch_is_invariant_violation() {
        let err = BeaconError::RootMismatch {
            root: "AutoStakingRoot",
            declared: [0u8; 32].into(),
            computed: [1u8; 32].into(),
        };
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
        assert!(err.to_string().contains("AutoStakingRoot"));
    }

    #[test]
    fn test_committee_error_messages() {
        assert!(CommitteeError::ZeroOffset("swap offset")
            .to_string()
            .contains("swap offset"));
        let err = CommitteeError::InvalidBounds { min: 5, max: 4 };
        assert!(err.to_string().contains("min 5"));
    }
}
