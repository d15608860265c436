//! # Core Entities
//!
//! Primitive identifiers used across the beacon chain and shard chains.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// A 32-byte keccak256 hash.
pub type Hash = [u8; 32];

/// The all-zero hash, used as the parent of the genesis block.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Shard identifier. Shard chains are numbered `0..active_shards`.
pub type ShardId = u8;

/// Height of a block on the beacon chain (genesis is height 1).
pub type BeaconHeight = u64;

/// Compute keccak256 over `data`.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute keccak256 over the concatenation of `parts`.
pub fn keccak256_concat<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hex rendering of a hash for logs and error messages.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexHash(pub Hash);

impl fmt::Display for HexHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for HexHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<Hash> for HexHash {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}
