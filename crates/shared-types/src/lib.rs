//! # Shared Types Crate
//!
//! Primitives shared by every crate in the workspace.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: hashes, shard identifiers and storage errors
//!   are defined once here and re-used by the beacon core and the event bus.
//! - **One hash function**: every consensus-critical digest goes through
//!   [`keccak256`] so two nodes can never disagree on the primitive.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
