//! # Quantum-Chain Beacon Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/          # Criterion benchmarks for committee math and apply
//! └── src/integration/  # Multi-node and event-bus flows
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p qc-tests
//! cargo bench -p qc-tests
//! ```

pub mod integration;
