//! Deterministic Randomness Oracle Adapter
//!
//! Stands in for the bitcoin-anchored oracle. The nonce for a timestamp is
//! derived from keccak256 of the timestamp, so every node sees the same
//! nonce. Delay and failure injection exercise the timeout path.

use crate::domain::{BeaconError, BeaconResult};
use crate::ports::{RandomNonce, RandomnessOracle};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::keccak256;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

/// Seconds between two oracle chain blocks.
const ORACLE_BLOCK_INTERVAL: i64 = 600;

/// Deterministic in-memory oracle.
pub struct DeterministicRandomnessOracle {
    chain_timestamp: AtomicI64,
    delay: RwLock<Option<Duration>>,
    fail: AtomicBool,
}

impl Default for DeterministicRandomnessOracle {
    fn default() -> Self {
        Self {
            chain_timestamp: AtomicI64::new(i64::MAX),
            delay: RwLock::new(None),
            fail: AtomicBool::new(false),
        }
    }
}

impl DeterministicRandomnessOracle {
    /// Oracle whose chain is always ahead of any checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Nonce the oracle reports for `timestamp`.
    pub fn nonce_for(timestamp: i64) -> RandomNonce {
        let digest = keccak256(&timestamp.to_le_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        let block_height = (timestamp.max(0) / ORACLE_BLOCK_INTERVAL) as u64 + 1;
        RandomNonce {
            block_height,
            chain_timestamp: (block_height as i64).saturating_mul(ORACLE_BLOCK_INTERVAL),
            nonce: i64::from_le_bytes(word),
        }
    }

    /// Set the oracle chain tip timestamp.
    pub fn set_chain_timestamp(&self, timestamp: i64) {
        self.chain_timestamp.store(timestamp, Ordering::SeqCst);
    }

    /// Delay every call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }

    /// Fail every call.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    async fn before_call(&self) -> BeaconResult<()> {
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BeaconError::Oracle("oracle unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RandomnessOracle for DeterministicRandomnessOracle {
    async fn get_nonce_by_timestamp(&self, timestamp: i64) -> BeaconResult<RandomNonce> {
        self.before_call().await?;
        if self.chain_timestamp.load(Ordering::SeqCst) <= timestamp {
            return Err(BeaconError::Oracle(format!(
                "no oracle block after timestamp {}",
                timestamp
            )));
        }
        Ok(Self::nonce_for(timestamp))
    }

    async fn verify_nonce_with_timestamp(&self, timestamp: i64, nonce: i64) -> BeaconResult<bool> {
        self.before_call().await?;
        Ok(Self::nonce_for(timestamp).nonce == nonce)
    }

    async fn current_chain_timestamp(&self) -> BeaconResult<i64> {
        self.before_call().await?;
        Ok(self.chain_timestamp.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nonce_round_trip() {
        let oracle = DeterministicRandomnessOracle::new();
        let fetched = oracle.get_nonce_by_timestamp(1_000).await.unwrap();
        assert!(oracle
            .verify_nonce_with_timestamp(1_000, fetched.nonce)
            .await
            .unwrap());
        assert!(!oracle
            .verify_nonce_with_timestamp(1_000, fetched.nonce.wrapping_add(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_chain_behind_checkpoint() {
        let oracle = DeterministicRandomnessOracle::new();
        oracle.set_chain_timestamp(500);
        assert!(oracle.get_nonce_by_timestamp(1_000).await.is_err());
        assert_eq!(oracle.current_chain_timestamp().await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let oracle = DeterministicRandomnessOracle::new();
        oracle.set_fail(true);
        assert!(matches!(
            oracle.current_chain_timestamp().await,
            Err(BeaconError::Oracle(_))
        ));
    }
}
