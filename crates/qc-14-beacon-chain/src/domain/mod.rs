//! # Domain Module
//!
//! Core domain types for the beacon chain: keys, instructions, blocks, the
//! beacon state and its transition function.

pub mod block;
pub mod errors;
pub mod instruction;
pub mod invariants;
pub mod keys;
pub mod state;
pub mod transition;
pub mod value_objects;

pub use block::*;
pub use errors::*;
pub use instruction::*;
pub use invariants::*;
pub use keys::*;
pub use state::*;
pub use value_objects::*;
