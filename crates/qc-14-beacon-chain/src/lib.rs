//! # QC-14 Beacon Chain
//!
//! Committee state machine and beacon block processing for the sharded node.
//!
//! **Subsystem ID:** 14
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! The beacon chain decides who validates what:
//! - Stakers enter candidate pools through `stake` instructions
//! - An oracle nonce per epoch shuffles candidates into shard pending lists
//! - `swap` instructions rotate pending validators into committees
//! - Shard-to-beacon blocks advance shard tips and cross-shard heights
//!
//! Every node derives the same committees from the same blocks, so all
//! iteration goes through ordered maps and all randomness is seeded by the
//! epoch's nonce.
//!
//! ## Block Flow
//!
//! ```text
//! [Shard-to-Beacon Pool] ──→ produce ──→ BeaconBlock
//!                                           │
//!               validate_block_for_signing ←┤
//!                                           ↓
//!          insert: checks → backup → apply(clone) → roots/nonce → batch
//!                                           │
//!                                           ↓
//!                            promote best state ──→ [Event Bus]
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! qc-14-beacon-chain/
//! ├── domain/          # Keys, instructions, blocks, BeaconState, transition
//! ├── algorithms/      # Shuffle, proposer index, swap, candidate assignment
//! ├── ports/           # BeaconChainApi + storage/pool/oracle/slashing traits
//! ├── adapters/        # In-memory store and pool, deterministic oracle, clocks
//! ├── service/         # BeaconChain controller, producer, validation
//! └── pde/             # Contribution matching instruction handler
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod config;
pub mod domain;
pub mod pde;
pub mod ports;
pub mod service;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports
pub use adapters::{
    CommitteeMembershipVerifier, DeterministicRandomnessOracle, InMemoryBeaconStore,
    InMemoryShardToBeaconPool, ManualTimeSource, RecordingSlashingProcessor, SystemTimeSource,
};
pub use algorithms::{assign_candidates, compute_swap, producer_index, shuffle};
pub use config::ChainParams;
pub use domain::{
    BeaconBlock, BeaconBody, BeaconError, BeaconHeader, BeaconResult, BeaconState, CommitteeKey,
    CommitteeRole, DecodedInstruction, ErrorKind, Instruction, InstructionError, ShardState,
    ShardToBeaconBlock, ShardToBeaconHeader,
};
pub use pde::PdeContributionHandler;
pub use ports::{
    BeaconChainApi, BeaconStorage, InstructionHandler, RandomnessOracle, ShardBlockVerifier,
    ShardToBeaconPool, SlashingProcessor, TimeSource,
};
pub use service::{BeaconChain, BeaconChainDeps};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_params_are_valid() {
        ChainParams::default().validate().unwrap();
        ChainParams::for_testing().validate().unwrap();
    }
}
