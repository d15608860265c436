//! # Outbound Ports
//!
//! Collaborators the beacon core drives: storage, the shard-to-beacon pool,
//! the randomness oracle, slashing, shard block signature checks, the
//! clock and pluggable instruction handlers.

use crate::domain::{
    BeaconBlock, BeaconResult, BeaconState, CommitteeKey, CommitteeSnapshot, Instruction,
    PaymentAddress, ShardToBeaconBlock,
};
use async_trait::async_trait;
use shared_types::{Hash, ShardId, StorageError};
use std::collections::{BTreeMap, BTreeSet};

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put {
        /// Key.
        key: Vec<u8>,
        /// Value.
        value: Vec<u8>,
    },
    /// Delete a key.
    Delete {
        /// Key.
        key: Vec<u8>,
    },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// Writes collected for one block insertion. Never shared across blocks.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOperation>,
}

impl WriteBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an operation.
    pub fn push(&mut self, op: BatchOperation) {
        self.ops.push(op);
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Nothing queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume into the queued operations.
    pub fn into_operations(self) -> Vec<BatchOperation> {
        self.ops
    }
}

/// Beacon chain persistence.
///
/// `store_*` methods only queue writes into the batch; nothing is visible
/// until [`BeaconStorage::put_batch`] commits the whole batch atomically.
pub trait BeaconStorage: Send + Sync {
    /// Block is stored.
    fn has_block(&self, hash: &Hash) -> Result<bool, StorageError>;

    /// Encoded block bytes. `StorageError::NotFound` when absent.
    fn fetch_block(&self, hash: &Hash) -> Result<Vec<u8>, StorageError>;

    /// Queue a block write.
    fn store_block(
        &self,
        batch: &mut WriteBatch,
        hash: &Hash,
        block: &BeaconBlock,
    ) -> Result<(), StorageError>;

    /// Queue the best-state write.
    fn store_best_state(
        &self,
        batch: &mut WriteBatch,
        state: &BeaconState,
    ) -> Result<(), StorageError>;

    /// Last persisted best state, if any.
    fn fetch_best_state(&self) -> Result<Option<BeaconState>, StorageError>;

    /// Queue the committees as of `height`.
    fn store_committee_by_height(
        &self,
        batch: &mut WriteBatch,
        height: u64,
        committees: &CommitteeSnapshot,
    ) -> Result<(), StorageError>;

    /// Committees as of `height`.
    fn fetch_committee_by_height(
        &self,
        height: u64,
    ) -> Result<Option<CommitteeSnapshot>, StorageError>;

    /// Queue the reward receivers as of `height`.
    fn store_reward_receiver_by_height(
        &self,
        batch: &mut WriteBatch,
        height: u64,
        receivers: &BTreeMap<CommitteeKey, PaymentAddress>,
    ) -> Result<(), StorageError>;

    /// Queue the auto-staking map as of `height`.
    fn store_auto_staking_by_height(
        &self,
        batch: &mut WriteBatch,
        height: u64,
        auto_staking: &BTreeMap<CommitteeKey, bool>,
    ) -> Result<(), StorageError>;

    /// Queue `(from, to, last_height) -> next_height`.
    fn store_cross_shard_next_height(
        &self,
        batch: &mut WriteBatch,
        from: ShardId,
        to: ShardId,
        last_height: u64,
        next_height: u64,
    ) -> Result<(), StorageError>;

    /// Next cross-shard height after `last_height`, if recorded.
    fn fetch_cross_shard_next_height(
        &self,
        from: ShardId,
        to: ShardId,
        last_height: u64,
    ) -> Result<Option<u64>, StorageError>;

    /// Queue the state of instruction handler `handler` as of block `hash`.
    fn store_handler_state(
        &self,
        batch: &mut WriteBatch,
        handler: &str,
        hash: &Hash,
        state: &[u8],
    ) -> Result<(), StorageError>;

    /// State of instruction handler `handler` as of block `hash`.
    fn fetch_handler_state(
        &self,
        handler: &str,
        hash: &Hash,
    ) -> Result<Option<Vec<u8>>, StorageError>;

    /// Commit a batch atomically.
    fn put_batch(&self, batch: WriteBatch) -> Result<(), StorageError>;

    /// Persist `state` as the revert target.
    fn backup_current_state(&self, state: &BeaconState) -> Result<(), StorageError>;

    /// The revert target, if any.
    fn fetch_backup(&self) -> Result<Option<BeaconState>, StorageError>;

    /// Drop the revert target.
    fn clean_backup(&self) -> Result<(), StorageError>;
}

/// Pool of shard-to-beacon blocks received from shards.
pub trait ShardToBeaconPool: Send + Sync {
    /// Blocks above each shard's limit, heights ascending.
    ///
    /// `limits` maps a shard to its highest acknowledged height; shards
    /// missing from the map are returned from height 2.
    fn get_valid_blocks(
        &self,
        limits: &BTreeMap<ShardId, u64>,
    ) -> BTreeMap<ShardId, Vec<ShardToBeaconBlock>>;

    /// Drop blocks at or below each shard's acknowledged height.
    fn prune(&self, acknowledged: &BTreeMap<ShardId, u64>);
}

/// Nonce fetched from the randomness oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomNonce {
    /// Oracle chain block height.
    pub block_height: u64,
    /// Oracle chain block timestamp.
    pub chain_timestamp: i64,
    /// The nonce.
    pub nonce: i64,
}

/// External randomness oracle (bitcoin-anchored).
///
/// Calls may block; the core wraps every call in `BlockMaxCreateTime`.
#[async_trait]
pub trait RandomnessOracle: Send + Sync {
    /// First oracle block at or after `timestamp`.
    async fn get_nonce_by_timestamp(&self, timestamp: i64) -> BeaconResult<RandomNonce>;

    /// Does `nonce` belong to the first oracle block at or after `timestamp`?
    async fn verify_nonce_with_timestamp(&self, timestamp: i64, nonce: i64) -> BeaconResult<bool>;

    /// Oracle chain tip timestamp.
    async fn current_chain_timestamp(&self) -> BeaconResult<i64>;
}

/// Slashing side process.
pub trait SlashingProcessor: Send + Sync {
    /// Run slashing against the committees about to be superseded.
    ///
    /// Failures are logged by the caller and never block insertion.
    fn process_slashing(
        &self,
        committees: &CommitteeSnapshot,
        block: &BeaconBlock,
    ) -> BeaconResult<()>;

    /// Producers barred from entering committees at `height`.
    fn producers_black_list(&self, height: u64) -> BTreeSet<CommitteeKey>;
}

/// Shard block committee-signature check.
pub trait ShardBlockVerifier: Send + Sync {
    /// `block` carries a valid aggregate signature of `committee`.
    fn verify(&self, block: &ShardToBeaconBlock, committee: &[CommitteeKey]) -> bool;
}

/// Wall clock, seconds since the Unix epoch.
pub trait TimeSource: Send + Sync {
    /// Current time.
    fn now(&self) -> i64;
}

/// Builds beacon instructions from shard metadata instructions and follows
/// committed beacon instructions.
///
/// `build_instructions` must be deterministic: the pre-sign validator calls
/// it again to re-derive a block's instruction set.
pub trait InstructionHandler: Send + Sync {
    /// Handler name for logs.
    fn name(&self) -> &'static str;

    /// Beacon instructions for the shard instructions of one beacon block,
    /// in shard then height order.
    fn build_instructions(
        &self,
        beacon_height: u64,
        shard_instructions: &[(ShardId, Instruction)],
    ) -> Vec<Instruction>;

    /// Encoded handler state after following `block` from the current
    /// state. The handler itself is left untouched.
    fn state_after(&self, block: &BeaconBlock) -> BeaconResult<Vec<u8>>;

    /// Encoded current state.
    fn current_state(&self) -> BeaconResult<Vec<u8>>;

    /// Replace the state with one from `state_after` or `current_state`.
    fn restore(&self, state: &[u8]) -> BeaconResult<()>;

    /// Follow a committed block. Either every instruction of the block is
    /// applied or none is.
    fn on_block_committed(&self, block: &BeaconBlock) -> BeaconResult<()> {
        let next = self.state_after(block)?;
        self.restore(&next)
    }
}
