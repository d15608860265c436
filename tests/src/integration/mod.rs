//! # Integration Flows
//!
//! Beacon chains wired to in-memory adapters and a shared event bus.

pub mod beacon_flows;
