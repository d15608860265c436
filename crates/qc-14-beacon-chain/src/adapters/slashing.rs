//! Recording Slashing Adapter
//!
//! Keeps a static producer blacklist and records every slashing call.
//! Failure injection covers the "slashing errors never block insertion"
//! path.

use crate::domain::{BeaconBlock, BeaconError, BeaconResult, CommitteeKey, CommitteeSnapshot};
use crate::ports::SlashingProcessor;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Slashing processor backed by a fixed blacklist.
#[derive(Default)]
pub struct RecordingSlashingProcessor {
    blacklist: RwLock<BTreeSet<CommitteeKey>>,
    processed_heights: RwLock<Vec<u64>>,
    fail: AtomicBool,
}

impl RecordingSlashingProcessor {
    /// Create a processor with an empty blacklist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bar `key` from entering committees.
    pub fn blacklist(&self, key: CommitteeKey) {
        self.blacklist.write().insert(key);
    }

    /// Make `process_slashing` fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Heights slashing ran for, in call order.
    pub fn processed_heights(&self) -> Vec<u64> {
        self.processed_heights.read().clone()
    }
}

impl SlashingProcessor for RecordingSlashingProcessor {
    fn process_slashing(
        &self,
        _committees: &CommitteeSnapshot,
        block: &BeaconBlock,
    ) -> BeaconResult<()> {
        self.processed_heights.write().push(block.height());
        if self.fail.load(Ordering::SeqCst) {
            return Err(BeaconError::InvalidState(
                "slashing processor failure".to_string(),
            ));
        }
        Ok(())
    }

    fn producers_black_list(&self, _height: u64) -> BTreeSet<CommitteeKey> {
        self.blacklist.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blacklist() {
        let processor = RecordingSlashingProcessor::new();
        let key = CommitteeKey::parse("bad").unwrap();
        processor.blacklist(key.clone());
        assert!(processor.producers_black_list(10).contains(&key));
    }
}
