//! # Adapters Layer (Hexagonal Architecture)
//!
//! In-memory implementations of the outbound ports, used by tests and by
//! single-node setups.

mod clock;
mod memory_store;
mod oracle;
mod pool;
mod slashing;
mod verifier;

pub use clock::{ManualTimeSource, SystemTimeSource};
pub use memory_store::InMemoryBeaconStore;
pub use oracle::DeterministicRandomnessOracle;
pub use pool::InMemoryShardToBeaconPool;
pub use slashing::RecordingSlashingProcessor;
pub use verifier::CommitteeMembershipVerifier;
