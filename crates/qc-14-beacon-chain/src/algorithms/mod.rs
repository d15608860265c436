//! # Algorithms Module
//!
//! Committee math for the beacon chain. Pure functions: no state, no I/O,
//! identical output on every node for identical input.

pub mod assignment;
pub mod proposer;
pub mod shuffle;
pub mod swap;

pub use assignment::{assign_candidates, candidate_shard_id, Assignment};
pub use proposer::producer_index;
pub use shuffle::shuffle;
pub use swap::{compute_swap, SwapOutcome};
