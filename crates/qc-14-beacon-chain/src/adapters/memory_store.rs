//! In-memory Beacon Storage Adapter
//!
//! Implements `BeaconStorage` over a sorted key-value map. Values are
//! bincode-encoded; batches are applied under one write lock so a reader
//! never observes half a block.

use crate::domain::{BeaconBlock, BeaconState, CommitteeKey, CommitteeSnapshot, PaymentAddress};
use crate::ports::{BatchOperation, BeaconStorage, WriteBatch};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{Hash, HexHash, ShardId, StorageError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};

/// Key schema.
mod keys {
    use shared_types::{Hash, ShardId};

    pub const BEST_STATE: &[u8] = b"beacon-best-state";
    pub const BACKUP_STATE: &[u8] = b"beacon-backup-state";

    pub fn block(hash: &Hash) -> Vec<u8> {
        prefixed(b"beacon-block-", hash)
    }

    pub fn committee(height: u64) -> Vec<u8> {
        prefixed(b"beacon-committee-", &height.to_be_bytes())
    }

    pub fn reward_receiver(height: u64) -> Vec<u8> {
        prefixed(b"reward-receiver-", &height.to_be_bytes())
    }

    pub fn auto_staking(height: u64) -> Vec<u8> {
        prefixed(b"auto-staking-", &height.to_be_bytes())
    }

    pub fn cross_shard_next_height(from: ShardId, to: ShardId, last_height: u64) -> Vec<u8> {
        let mut key = prefixed(b"cross-shard-next-", &[from, to]);
        key.extend_from_slice(&last_height.to_be_bytes());
        key
    }

    pub fn handler_state(handler: &str, hash: &Hash) -> Vec<u8> {
        let mut key = prefixed(b"handler-state-", handler.as_bytes());
        key.push(b'-');
        key.extend_from_slice(hash);
        key
    }

    fn prefixed(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + suffix.len());
        key.extend_from_slice(prefix);
        key.extend_from_slice(suffix);
        key
    }
}

/// In-memory beacon store for tests and single-node setups.
#[derive(Default)]
pub struct InMemoryBeaconStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    fail_writes: AtomicBool,
    batches_written: RwLock<u64>,
}

impl InMemoryBeaconStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `put_batch` fail (storage failure injection).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of committed batches.
    pub fn batches_written(&self) -> u64 {
        *self.batches_written.read()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    fn get_decoded<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StorageError> {
        match self.get(key) {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

impl BeaconStorage for InMemoryBeaconStore {
    fn has_block(&self, hash: &Hash) -> Result<bool, StorageError> {
        Ok(self.data.read().contains_key(&keys::block(hash)))
    }

    fn fetch_block(&self, hash: &Hash) -> Result<Vec<u8>, StorageError> {
        self.get(&keys::block(hash))
            .ok_or_else(|| StorageError::NotFound(format!("beacon block {}", HexHash::from(*hash))))
    }

    fn store_block(
        &self,
        batch: &mut WriteBatch,
        hash: &Hash,
        block: &BeaconBlock,
    ) -> Result<(), StorageError> {
        batch.push(BatchOperation::put(keys::block(hash), encode(block)?));
        Ok(())
    }

    fn store_best_state(
        &self,
        batch: &mut WriteBatch,
        state: &BeaconState,
    ) -> Result<(), StorageError> {
        batch.push(BatchOperation::put(keys::BEST_STATE, encode(state)?));
        Ok(())
    }

    fn fetch_best_state(&self) -> Result<Option<BeaconState>, StorageError> {
        self.get_decoded(keys::BEST_STATE)
    }

    fn store_committee_by_height(
        &self,
        batch: &mut WriteBatch,
        height: u64,
        committees: &CommitteeSnapshot,
    ) -> Result<(), StorageError> {
        batch.push(BatchOperation::put(
            keys::committee(height),
            encode(committees)?,
        ));
        Ok(())
    }

    fn fetch_committee_by_height(
        &self,
        height: u64,
    ) -> Result<Option<CommitteeSnapshot>, StorageError> {
        self.get_decoded(&keys::committee(height))
    }

    fn store_reward_receiver_by_height(
        &self,
        batch: &mut WriteBatch,
        height: u64,
        receivers: &BTreeMap<CommitteeKey, PaymentAddress>,
    ) -> Result<(), StorageError> {
        batch.push(BatchOperation::put(
            keys::reward_receiver(height),
            encode(receivers)?,
        ));
        Ok(())
    }

    fn store_auto_staking_by_height(
        &self,
        batch: &mut WriteBatch,
        height: u64,
        auto_staking: &BTreeMap<CommitteeKey, bool>,
    ) -> Result<(), StorageError> {
        batch.push(BatchOperation::put(
            keys::auto_staking(height),
            encode(auto_staking)?,
        ));
        Ok(())
    }

    fn store_cross_shard_next_height(
        &self,
        batch: &mut WriteBatch,
        from: ShardId,
        to: ShardId,
        last_height: u64,
        next_height: u64,
    ) -> Result<(), StorageError> {
        batch.push(BatchOperation::put(
            keys::cross_shard_next_height(from, to, last_height),
            next_height.to_be_bytes().to_vec(),
        ));
        Ok(())
    }

    fn fetch_cross_shard_next_height(
        &self,
        from: ShardId,
        to: ShardId,
        last_height: u64,
    ) -> Result<Option<u64>, StorageError> {
        let Some(bytes) = self.get(&keys::cross_shard_next_height(from, to, last_height)) else {
            return Ok(None);
        };
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::Serialization("cross-shard height".to_string()))?;
        Ok(Some(u64::from_be_bytes(raw)))
    }

    fn store_handler_state(
        &self,
        batch: &mut WriteBatch,
        handler: &str,
        hash: &Hash,
        state: &[u8],
    ) -> Result<(), StorageError> {
        batch.push(BatchOperation::put(keys::handler_state(handler, hash), state));
        Ok(())
    }

    fn fetch_handler_state(
        &self,
        handler: &str,
        hash: &Hash,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.get(&keys::handler_state(handler, hash)))
    }

    fn put_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            error!(operations = batch.len(), "Beacon batch write failed");
            return Err(StorageError::BatchFailed(
                "write failure injected".to_string(),
            ));
        }
        let operations = batch.into_operations();
        let count = operations.len();
        let mut data = self.data.write();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        drop(data);
        *self.batches_written.write() += 1;
        debug!(operations = count, "Beacon batch committed");
        Ok(())
    }

    fn backup_current_state(&self, state: &BeaconState) -> Result<(), StorageError> {
        let bytes = encode(state)?;
        self.data.write().insert(keys::BACKUP_STATE.to_vec(), bytes);
        Ok(())
    }

    fn fetch_backup(&self) -> Result<Option<BeaconState>, StorageError> {
        self.get_decoded(keys::BACKUP_STATE)
    }

    fn clean_backup(&self) -> Result<(), StorageError> {
        self.data.write().remove(keys::BACKUP_STATE);
        Ok(())
    }
}
