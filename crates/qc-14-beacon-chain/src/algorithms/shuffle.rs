//! # Candidate Shuffle
//!
//! Seeded Fisher-Yates permutation. Every node must produce the identical
//! permutation for the same seed and input order, so the PRNG is a keccak
//! hash chain with no platform-dependent state.

use shared_types::{keccak256, keccak256_concat, Hash};

/// Initial PRNG state for a random-number seed.
fn seed_state(seed: i64) -> Hash {
    keccak256(&seed.to_le_bytes())
}

/// Advance the hash chain for position `i`.
fn next_state(state: &Hash, i: u64) -> Hash {
    keccak256_concat([state.as_slice(), &i.to_le_bytes()])
}

/// Shuffle `items` with the epoch random number.
pub fn shuffle<T: Clone>(items: &[T], seed: i64) -> Vec<T> {
    let mut result = items.to_vec();
    let len = result.len();

    if len <= 1 {
        return result;
    }

    let mut rng_state = seed_state(seed);

    for i in (1..len).rev() {
        rng_state = next_state(&rng_state, i as u64);
        let mut word = [0u8; 8];
        word.copy_from_slice(&rng_state[0..8]);
        let j = (u64::from_le_bytes(word) % (i as u64 + 1)) as usize;
        result.swap(i, j);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("candidate-{}", i)).collect()
    }

    #[test]
    fn test_same_seed_same_order() {
        let items = names(20);
        assert_eq!(shuffle(&items, 42), shuffle(&items, 42));
    }

    #[test]
    fn test_different_seed_different_order() {
        let items = names(20);
        assert_ne!(shuffle(&items, 42), shuffle(&items, 43));
    }

    #[test]
    fn test_small_inputs_unchanged() {
        let empty: Vec<String> = vec![];
        assert!(shuffle(&empty, 1).is_empty());
        assert_eq!(shuffle(&names(1), 1), names(1));
    }

    proptest! {
        #[test]
        fn prop_shuffle_is_deterministic_permutation(n in 0usize..40, seed in any::<i64>()) {
            let items = names(n);
            let first = shuffle(&items, seed);
            prop_assert_eq!(&first, &shuffle(&items, seed));

            let mut sorted = first.clone();
            sorted.sort();
            let mut expected = items.clone();
            expected.sort();
            prop_assert_eq!(sorted, expected);
        }
    }
}
