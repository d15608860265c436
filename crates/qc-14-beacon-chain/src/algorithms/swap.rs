//! # Validator Swap
//!
//! Rotates pending validators into a committee, oldest members out first.
//!
//! ```text
//! pending:   [p1 p2 p3 p4]      committee: [c1 c2 c3 c4]   (max 4)
//!               |  |                           |  |
//!               v  v                           v  v
//! new committee: [c3 c4 p1 p2]   swapped out: [c1 c2]
//! ```
//!
//! At most `offset` validators enter and at most `swap_offset` leave. Free
//! seats are filled first; members only leave to make room for entrants.
//! A committee inside `[min, max]` stays inside it.

use crate::domain::{CommitteeError, CommitteeKey};
use std::collections::BTreeSet;

/// Result of one swap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapOutcome {
    /// Blacklisted pending validators evicted from the pending list.
    pub removed: Vec<CommitteeKey>,
    /// Pending validators left waiting.
    pub remaining_pending: Vec<CommitteeKey>,
    /// Pending validators that joined the committee.
    pub swapped_in: Vec<CommitteeKey>,
    /// Committee members that left.
    pub swapped_out: Vec<CommitteeKey>,
    /// Committee after the swap.
    pub new_committee: Vec<CommitteeKey>,
}

impl SwapOutcome {
    /// Nothing moves.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.swapped_in.is_empty() && self.swapped_out.is_empty()
    }

    /// Keys listed in the swap instruction's out-list.
    pub fn out_keys(&self) -> Vec<CommitteeKey> {
        self.swapped_out
            .iter()
            .chain(self.removed.iter())
            .cloned()
            .collect()
    }
}

/// Compute one committee swap.
pub fn compute_swap(
    pending: &[CommitteeKey],
    committee: &[CommitteeKey],
    max_size: usize,
    min_size: usize,
    offset: usize,
    blacklist: &BTreeSet<CommitteeKey>,
    swap_offset: usize,
) -> Result<SwapOutcome, CommitteeError> {
    if min_size > max_size {
        return Err(CommitteeError::InvalidBounds {
            min: min_size,
            max: max_size,
        });
    }
    if offset == 0 {
        return Err(CommitteeError::ZeroOffset("offset"));
    }
    if swap_offset == 0 {
        return Err(CommitteeError::ZeroOffset("swap offset"));
    }
    if committee.len() < min_size || committee.len() > max_size {
        return Err(CommitteeError::SizeOutOfBounds {
            size: committee.len(),
            min: min_size,
            max: max_size,
        });
    }
    ensure_unique(pending.iter().chain(committee.iter()))?;

    let (removed, good_pending): (Vec<_>, Vec<_>) = pending
        .iter()
        .cloned()
        .partition(|key| blacklist.contains(key));

    let entering = offset.min(good_pending.len());
    let vacancies = max_size - committee.len();
    // Never more leavers than members.
    let out_count = if entering > vacancies {
        swap_offset
            .min(entering - vacancies)
            .min(committee.len())
    } else {
        0
    };
    let in_count = entering.min(vacancies + out_count);

    let swapped_out = committee[..out_count].to_vec();
    let swapped_in = good_pending[..in_count].to_vec();
    let remaining_pending = good_pending[in_count..].to_vec();
    let mut new_committee = committee[out_count..].to_vec();
    new_committee.extend(swapped_in.iter().cloned());

    Ok(SwapOutcome {
        removed,
        remaining_pending,
        swapped_in,
        swapped_out,
        new_committee,
    })
}

fn ensure_unique<'a>(keys: impl Iterator<Item = &'a CommitteeKey>) -> Result<(), CommitteeError> {
    let mut seen = BTreeSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(CommitteeError::DuplicateKey(key.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keys(prefix: &str, n: usize) -> Vec<CommitteeKey> {
        (0..n)
            .map(|i| CommitteeKey::parse(&format!("{}{}", prefix, i)).unwrap())
            .collect()
    }

    #[test]
    fn test_full_committee_rotates_oldest_first() {
        let pending = keys("p", 4);
        let committee = keys("c", 4);
        let out = compute_swap(&pending, &committee, 4, 4, 2, &BTreeSet::new(), 2).unwrap();
        assert_eq!(out.swapped_out, committee[..2].to_vec());
        assert_eq!(out.swapped_in, pending[..2].to_vec());
        assert_eq!(out.remaining_pending, pending[2..].to_vec());
        assert_eq!(
            out.new_committee,
            vec![
                committee[2].clone(),
                committee[3].clone(),
                pending[0].clone(),
                pending[1].clone()
            ]
        );
    }

    #[test]
    fn test_vacancies_filled_before_swapping_out() {
        let pending = keys("p", 2);
        let committee = keys("c", 4);
        let out = compute_swap(&pending, &committee, 6, 4, 4, &BTreeSet::new(), 4).unwrap();
        assert!(out.swapped_out.is_empty());
        assert_eq!(out.new_committee.len(), 6);
    }

    #[test]
    fn test_blacklisted_pending_removed() {
        let pending = keys("p", 3);
        let committee = keys("c", 4);
        let blacklist: BTreeSet<_> = [pending[0].clone()].into_iter().collect();
        let out = compute_swap(&pending, &committee, 4, 4, 1, &blacklist, 1).unwrap();
        assert_eq!(out.removed, vec![pending[0].clone()]);
        assert_eq!(out.swapped_in, vec![pending[1].clone()]);
        assert_eq!(out.remaining_pending, vec![pending[2].clone()]);
        assert_eq!(out.out_keys(), vec![committee[0].clone(), pending[0].clone()]);
    }

    #[test]
    fn test_no_pending_is_noop() {
        let committee = keys("c", 4);
        let out = compute_swap(&[], &committee, 8, 4, 2, &BTreeSet::new(), 2).unwrap();
        assert!(out.is_noop());
        assert_eq!(out.new_committee, committee);
    }

    #[test]
    fn test_invalid_arguments() {
        let committee = keys("c", 4);
        let empty = BTreeSet::new();
        assert!(matches!(
            compute_swap(&[], &committee, 3, 4, 1, &empty, 1),
            Err(CommitteeError::InvalidBounds { .. })
        ));
        assert!(matches!(
            compute_swap(&[], &committee, 8, 4, 0, &empty, 1),
            Err(CommitteeError::ZeroOffset(_))
        ));
        assert!(matches!(
            compute_swap(&[], &committee, 3, 3, 1, &empty, 1),
            Err(CommitteeError::SizeOutOfBounds { .. })
        ));
        let dup = vec![committee[0].clone()];
        assert!(matches!(
            compute_swap(&dup, &committee, 8, 4, 1, &empty, 1),
            Err(CommitteeError::DuplicateKey(_))
        ));
    }

    #[test]
    fn test_offsets_larger_than_committee() {
        let pending = keys("p", 5);
        let committee = keys("c", 4);
        let out = compute_swap(&pending, &committee, 4, 4, 5, &BTreeSet::new(), 5).unwrap();
        assert_eq!(out.swapped_out, committee);
        assert_eq!(out.swapped_in, pending[..4].to_vec());
        assert_eq!(out.remaining_pending, vec![pending[4].clone()]);
        assert_eq!(out.new_committee, pending[..4].to_vec());
    }

    proptest! {
        #[test]
        fn prop_new_committee_within_bounds(
            min in 3usize..6,
            extra in 0usize..6,
            size_pick in 0usize..100,
            pending_len in 0usize..12,
            offset in 1usize..6,
            swap_offset in 1usize..6,
            blacklisted in 0usize..3,
        ) {
            let max = min + extra;
            let size = min + size_pick % (extra + 1);
            let committee = keys("c", size);
            let pending = keys("p", pending_len);
            let blacklist: BTreeSet<_> = pending.iter().take(blacklisted).cloned().collect();

            let out = compute_swap(&pending, &committee, max, min, offset, &blacklist, swap_offset)
                .unwrap();
            prop_assert!(out.new_committee.len() >= min);
            prop_assert!(out.new_committee.len() <= max);
            prop_assert!(out.swapped_in.len() <= offset);
            prop_assert!(out.swapped_out.len() <= swap_offset);
            prop_assert_eq!(
                out.removed.len() + out.swapped_in.len() + out.remaining_pending.len(),
                pending_len
            );
        }
    }
}
