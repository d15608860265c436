//! # Inbound Ports
//!
//! API trait defining what the beacon chain offers to consensus, networking
//! and RPC.

use crate::domain::{BeaconBlock, BeaconResult, BeaconState, CommitteeKey, CommitteeRole};
use async_trait::async_trait;

/// Beacon chain API - inbound port.
#[async_trait]
pub trait BeaconChainApi: Send + Sync {
    /// Insert a block. `is_validated` skips checks already run while signing.
    async fn insert_block(&self, block: BeaconBlock, is_validated: bool) -> BeaconResult<()>;

    /// Produce the next block as `producer` in `round`.
    async fn produce_block(&self, producer: &CommitteeKey, round: u32)
        -> BeaconResult<BeaconBlock>;

    /// Validate a proposed block before signing it.
    async fn validate_block_for_signing(&self, block: &BeaconBlock) -> BeaconResult<()>;

    /// Copy of the best state.
    fn best_state(&self) -> BeaconState;

    /// Best height.
    fn best_height(&self) -> u64;

    /// Role of `key` in the best state.
    fn role_of(&self, key: &CommitteeKey) -> CommitteeRole;
}
