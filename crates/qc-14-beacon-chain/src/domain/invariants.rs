//! # Domain Invariants
//!
//! Rules every promoted beacon state must satisfy.

use super::errors::{BeaconError, BeaconResult};
use super::state::BeaconState;
use std::collections::BTreeSet;

/// Invariant: no key appears twice across committees, pending and
/// candidate lists.
pub fn invariant_keys_disjoint(state: &BeaconState) -> BeaconResult<()> {
    let mut seen = BTreeSet::new();
    for key in state.all_keys() {
        if !seen.insert(key) {
            return Err(BeaconError::InvalidState(format!(
                "key {} appears in more than one list",
                key
            )));
        }
    }
    Ok(())
}

/// Invariant: committee sizes stay inside their bounds.
pub fn invariant_committee_bounds(state: &BeaconState) -> BeaconResult<()> {
    let beacon = state.beacon_committee.len();
    if beacon < state.min_beacon_committee_size || beacon > state.max_beacon_committee_size {
        return Err(BeaconError::InvalidState(format!(
            "beacon committee size {} outside [{}, {}]",
            beacon, state.min_beacon_committee_size, state.max_beacon_committee_size
        )));
    }
    for shard_id in 0..state.active_shards {
        let size = state.shard_committee_of(shard_id).len();
        if size < state.min_shard_committee_size || size > state.max_shard_committee_size {
            return Err(BeaconError::InvalidState(format!(
                "shard {} committee size {} outside [{}, {}]",
                shard_id, size, state.min_shard_committee_size, state.max_shard_committee_size
            )));
        }
    }
    Ok(())
}

/// Invariant: cross-shard heights never decrease.
pub fn invariant_cross_shard_monotonic(
    before: &BeaconState,
    after: &BeaconState,
) -> BeaconResult<()> {
    for (from, targets) in &before.last_cross_shard_state {
        for (to, height) in targets {
            let now = after
                .last_cross_shard_state
                .get(from)
                .and_then(|t| t.get(to))
                .copied()
                .unwrap_or(0);
            if now < *height {
                return Err(BeaconError::InvalidState(format!(
                    "cross-shard height {} -> {} went from {} to {}",
                    from, to, height, now
                )));
            }
        }
    }
    Ok(())
}

/// Check every invariant of a freshly derived state.
pub fn check_state_invariants(before: &BeaconState, after: &BeaconState) -> BeaconResult<()> {
    invariant_keys_disjoint(after)?;
    invariant_committee_bounds(after)?;
    invariant_cross_shard_monotonic(before, after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{genesis_state, key};

    #[test]
    fn test_genesis_satisfies_invariants() {
        let state = genesis_state();
        assert!(check_state_invariants(&state, &state).is_ok());
    }

    #[test]
    fn test_duplicate_key_detected() {
        let mut state = genesis_state();
        let member = state.beacon_committee[0].clone();
        state.candidate_shard_waiting_for_next_random.push(member);
        assert!(invariant_keys_disjoint(&state).is_err());
    }

    #[test]
    fn test_oversized_committee_detected() {
        let mut state = genesis_state();
        for i in 0..state.max_beacon_committee_size {
            state.beacon_committee.push(key(&format!("extra{}", i)));
        }
        assert!(invariant_committee_bounds(&state).is_err());
    }

    #[test]
    fn test_cross_shard_regression_detected() {
        let mut before = genesis_state();
        before
            .last_cross_shard_state
            .entry(0)
            .or_default()
            .insert(1, 10);
        let mut after = before.clone();
        after
            .last_cross_shard_state
            .entry(0)
            .or_default()
            .insert(1, 9);
        assert!(invariant_cross_shard_monotonic(&before, &after).is_err());
        assert!(invariant_cross_shard_monotonic(&after, &before).is_ok());
    }
}
