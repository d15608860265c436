//! Shard Block Verifier Adapter
//!
//! Signature aggregation is outside the beacon core. This adapter accepts a
//! shard-to-beacon block when its producer sits in the shard committee and
//! it carries validation data.

use crate::domain::{CommitteeKey, ShardToBeaconBlock};
use crate::ports::ShardBlockVerifier;

/// Committee-membership verifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommitteeMembershipVerifier;

impl ShardBlockVerifier for CommitteeMembershipVerifier {
    fn verify(&self, block: &ShardToBeaconBlock, committee: &[CommitteeKey]) -> bool {
        !block.validation_data.is_empty() && committee.contains(&block.header.producer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{genesis_state, shard_block_by};

    #[test]
    fn test_requires_committee_producer_and_signature() {
        let state = genesis_state();
        let committee = state.shard_committee_of(0);
        let verifier = CommitteeMembershipVerifier;

        let good = shard_block_by(0, 2, committee[0].clone(), vec![]);
        assert!(verifier.verify(&good, committee));

        let mut unsigned = good.clone();
        unsigned.validation_data.clear();
        assert!(!verifier.verify(&unsigned, committee));

        let outsider = shard_block_by(0, 2, CommitteeKey::parse("outsider").unwrap(), vec![]);
        assert!(!verifier.verify(&outsider, committee));
    }
}
