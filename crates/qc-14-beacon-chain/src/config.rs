//! # Chain Parameters
//!
//! Consensus constants of the beacon chain. Every node of a network must run
//! with identical parameters; they feed epoch boundaries, committee bounds
//! and swap sizes directly.

use crate::domain::{BeaconError, BeaconResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest committee any chain may run with.
pub const MIN_COMMITTEE_SIZE: usize = 3;

/// Beacon chain consensus parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Expected header version.
    pub block_version: u32,

    /// Blocks per epoch.
    pub epoch: u64,

    /// In-epoch height at which next-random candidates become current-random.
    pub random_time: u64,

    /// Max pending validators swapped into a committee per swap.
    pub offset: usize,

    /// Max committee members swapped out per swap.
    pub swap_offset: usize,

    /// Max pending validators a shard may hold after assignment.
    pub assign_offset: usize,

    /// Number of shards.
    pub active_shards: u8,

    /// Beacon committee lower bound.
    pub min_beacon_committee_size: usize,

    /// Beacon committee upper bound.
    pub max_beacon_committee_size: usize,

    /// Shard committee lower bound.
    pub min_shard_committee_size: usize,

    /// Shard committee upper bound.
    pub max_shard_committee_size: usize,

    /// Shard-to-beacon blocks taken per shard per beacon block.
    pub max_s2b_blocks: usize,

    /// Randomness oracle budget in milliseconds.
    pub block_max_create_time_ms: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            block_version: 1,
            epoch: 350,
            random_time: 175,
            offset: 4,
            swap_offset: 4,
            assign_offset: 8,
            active_shards: 8,
            min_beacon_committee_size: 4,
            max_beacon_committee_size: 16,
            min_shard_committee_size: 4,
            max_shard_committee_size: 16,
            max_s2b_blocks: 5,
            block_max_create_time_ms: 10_000,
        }
    }
}

impl ChainParams {
    /// Create params for testing (short epochs, two shards).
    pub fn for_testing() -> Self {
        Self {
            block_version: 1,
            epoch: 10,
            random_time: 5,
            offset: 2,
            swap_offset: 2,
            assign_offset: 4,
            active_shards: 2,
            min_beacon_committee_size: 4,
            max_beacon_committee_size: 8,
            min_shard_committee_size: 3,
            max_shard_committee_size: 8,
            max_s2b_blocks: 3,
            block_max_create_time_ms: 1_000,
        }
    }

    /// Oracle timeout.
    pub fn block_max_create_time(&self) -> Duration {
        Duration::from_millis(self.block_max_create_time_ms)
    }

    /// Check the parameters describe a runnable chain.
    pub fn validate(&self) -> BeaconResult<()> {
        if self.epoch < 2 {
            return Err(invalid(format!("epoch {} must be at least 2", self.epoch)));
        }
        if self.random_time < 2 || self.random_time >= self.epoch {
            return Err(invalid(format!(
                "random time {} must be in [2, {})",
                self.random_time, self.epoch
            )));
        }
        if self.offset == 0 || self.swap_offset == 0 || self.assign_offset == 0 {
            return Err(invalid("offsets can't be zero".to_string()));
        }
        if self.active_shards == 0 {
            return Err(invalid("active shards can't be zero".to_string()));
        }
        if self.max_s2b_blocks == 0 {
            return Err(invalid("max s2b blocks can't be zero".to_string()));
        }
        check_bounds(
            "beacon",
            self.min_beacon_committee_size,
            self.max_beacon_committee_size,
        )?;
        check_bounds(
            "shard",
            self.min_shard_committee_size,
            self.max_shard_committee_size,
        )
    }
}

fn check_bounds(chain: &str, min: usize, max: usize) -> BeaconResult<()> {
    if min < MIN_COMMITTEE_SIZE {
        return Err(invalid(format!(
            "{} committee min size {} below {}",
            chain, min, MIN_COMMITTEE_SIZE
        )));
    }
    if min > max {
        return Err(invalid(format!(
            "{} committee min size {} above max size {}",
            chain, min, max
        )));
    }
    Ok(())
}

fn invalid(reason: String) -> BeaconError {
    BeaconError::InvalidParams(reason)
}
