//! In-memory Shard-to-Beacon Pool Adapter
//!
//! Holds shard-to-beacon blocks per shard, keyed by height. The first block
//! a shard sends is height 2 (height 1 is the shard's genesis).

use crate::domain::ShardToBeaconBlock;
use crate::ports::ShardToBeaconPool;
use parking_lot::RwLock;
use shared_types::ShardId;
use std::collections::BTreeMap;
use tracing::debug;

/// In-memory shard-to-beacon pool.
#[derive(Default)]
pub struct InMemoryShardToBeaconPool {
    blocks: RwLock<BTreeMap<ShardId, BTreeMap<u64, ShardToBeaconBlock>>>,
}

impl InMemoryShardToBeaconPool {
    /// Create a new empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block. A block at an existing height replaces it.
    pub fn add_block(&self, block: ShardToBeaconBlock) {
        let shard_id = block.header.shard_id;
        let height = block.header.height;
        self.blocks
            .write()
            .entry(shard_id)
            .or_default()
            .insert(height, block);
        debug!(shard_id, height, "Shard-to-beacon block pooled");
    }

    /// Number of pooled blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().values().map(BTreeMap::len).sum()
    }

    /// Pool holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ShardToBeaconPool for InMemoryShardToBeaconPool {
    fn get_valid_blocks(
        &self,
        limits: &BTreeMap<ShardId, u64>,
    ) -> BTreeMap<ShardId, Vec<ShardToBeaconBlock>> {
        let blocks = self.blocks.read();
        blocks
            .iter()
            .map(|(shard_id, by_height)| {
                let limit = limits.get(shard_id).copied().unwrap_or(1);
                let above: Vec<ShardToBeaconBlock> = by_height
                    .range(limit + 1..)
                    .map(|(_, block)| block.clone())
                    .collect();
                (*shard_id, above)
            })
            .filter(|(_, above)| !above.is_empty())
            .collect()
    }

    fn prune(&self, acknowledged: &BTreeMap<ShardId, u64>) {
        let mut blocks = self.blocks.write();
        for (shard_id, height) in acknowledged {
            if let Some(by_height) = blocks.get_mut(shard_id) {
                by_height.retain(|h, _| h > height);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::shard_block;

    #[test]
    fn test_returns_blocks_above_limit() {
        let pool = InMemoryShardToBeaconPool::new();
        for height in 2..6 {
            pool.add_block(shard_block(0, height, vec![]));
        }
        pool.add_block(shard_block(1, 2, vec![]));

        let mut limits = BTreeMap::new();
        limits.insert(0, 3);
        let valid = pool.get_valid_blocks(&limits);

        let heights: Vec<u64> = valid[&0].iter().map(|b| b.header.height).collect();
        assert_eq!(heights, vec![4, 5]);
        assert_eq!(valid[&1].len(), 1);
    }

    #[test]
    fn test_prune() {
        let pool = InMemoryShardToBeaconPool::new();
        for height in 2..5 {
            pool.add_block(shard_block(0, height, vec![]));
        }
        let mut acknowledged = BTreeMap::new();
        acknowledged.insert(0, 3);
        pool.prune(&acknowledged);
        assert_eq!(pool.len(), 1);
    }
}
