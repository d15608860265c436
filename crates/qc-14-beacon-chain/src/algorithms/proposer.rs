//! Producer selection.

use crate::domain::CommitteeError;

/// Committee position of the producer for the next block.
///
/// `proposer_offset` is the previous producer's position plus one. `round`
/// is accepted but does not move the index: a round change keeps the same
/// producer until the next height.
pub fn producer_index(
    committee_len: usize,
    proposer_offset: usize,
    _round: u32,
) -> Result<usize, CommitteeError> {
    if committee_len == 0 {
        return Err(CommitteeError::EmptyCommittee);
    }
    Ok(proposer_offset % committee_len)
}
