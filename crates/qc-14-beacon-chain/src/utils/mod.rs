//! Utility functions shared across the subsystem.

pub mod hashing;

pub use hashing::*;
