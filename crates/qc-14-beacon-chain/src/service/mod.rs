//! Beacon Chain Service - block insertion, validation and production
//!
//! # Architecture
//! - One chain lock serializes insertion, production and pre-sign
//!   validation; it may be held across oracle calls.
//! - The best state sits behind a reader/writer lock that is never held
//!   across an `.await`. Readers (role lookups, committee queries) never
//!   wait for a block to finish applying.
//! - Every block is applied to a private clone. The clone is promoted only
//!   after post-processing checks and the storage batch succeed.
//! - Side effects that are not consensus-critical go out through the event
//!   bus after the commit.

mod instructions;
mod producer;
mod validation;

pub use instructions::{
    BuildInputs, InstructionBuilder, ACCEPTED_BLOCK_REWARD_META, BEACON_REWARD_META,
};
pub use validation::{random_instruction, random_nonce, BlockValidator};

use crate::config::ChainParams;
use crate::domain::{
    check_state_invariants, BeaconBlock, BeaconError, BeaconResult, BeaconState, BlockEffects,
    CommitteeKey, CommitteeRole, ShardToBeaconBlock,
};
use crate::ports::{
    BeaconChainApi, BeaconStorage, InstructionHandler, RandomnessOracle, ShardBlockVerifier,
    ShardToBeaconPool, SlashingProcessor, TimeSource, WriteBatch,
};
use crate::utils::instructions_hash;
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_bus::{BeaconEvent, EventPublisher};
use shared_types::{Hash, HexHash, ShardId, StorageError};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Collaborators of the beacon chain.
pub struct BeaconChainDeps {
    /// Block and state persistence.
    pub storage: Arc<dyn BeaconStorage>,
    /// Shard-to-beacon block pool.
    pub pool: Arc<dyn ShardToBeaconPool>,
    /// Randomness oracle.
    pub oracle: Arc<dyn RandomnessOracle>,
    /// Slashing side process.
    pub slashing: Arc<dyn SlashingProcessor>,
    /// Shard block committee-signature check.
    pub verifier: Arc<dyn ShardBlockVerifier>,
    /// Wall clock.
    pub time_source: Arc<dyn TimeSource>,
    /// Notification sink.
    pub events: Arc<dyn EventPublisher>,
    /// Consensus parameters.
    pub params: ChainParams,
}

/// How far a block has been validated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckMode {
    /// Full insertion checks.
    Insert,
    /// Insertion of a block already validated while signing.
    PreValidated,
    /// Validation before signing: re-derives instructions, never reverts.
    PreSign,
}

/// The beacon chain controller.
pub struct BeaconChain {
    storage: Arc<dyn BeaconStorage>,
    pool: Arc<dyn ShardToBeaconPool>,
    oracle: Arc<dyn RandomnessOracle>,
    slashing: Arc<dyn SlashingProcessor>,
    verifier: Arc<dyn ShardBlockVerifier>,
    time_source: Arc<dyn TimeSource>,
    events: Arc<dyn EventPublisher>,
    params: ChainParams,
    handlers: Vec<Arc<dyn InstructionHandler>>,
    chain_lock: Mutex<()>,
    best_state: RwLock<BeaconState>,
}

impl BeaconChain {
    /// Bootstrap from a genesis block and persist it.
    pub fn new(deps: BeaconChainDeps, genesis: &BeaconBlock) -> BeaconResult<Self> {
        let state = BeaconState::from_genesis(genesis, &deps.params)?;

        let storage = deps.storage.clone();
        let hash = genesis.hash();
        let mut batch = WriteBatch::new();
        storage.store_block(&mut batch, &hash, genesis)?;
        storage.store_best_state(&mut batch, &state)?;
        storage.store_committee_by_height(&mut batch, 1, &state.committee_snapshot())?;
        storage.store_reward_receiver_by_height(&mut batch, 1, &state.reward_receiver)?;
        storage.store_auto_staking_by_height(&mut batch, 1, &state.auto_staking)?;
        storage.put_batch(batch)?;

        info!(
            hash = %HexHash::from(hash),
            beacon_committee = state.beacon_committee.len(),
            "Beacon chain initialized from genesis"
        );
        Ok(Self::from_parts(deps, state))
    }

    /// Resume from the persisted best state.
    pub fn load(deps: BeaconChainDeps) -> BeaconResult<Self> {
        deps.params.validate()?;
        let state = deps
            .storage
            .fetch_best_state()?
            .ok_or(BeaconError::EmptyState)?;
        if state.height == 0 || state.beacon_committee.is_empty() {
            return Err(BeaconError::EmptyState);
        }
        info!(height = state.height, epoch = state.epoch, "Beacon chain loaded");
        Ok(Self::from_parts(deps, state))
    }

    fn from_parts(deps: BeaconChainDeps, state: BeaconState) -> Self {
        Self {
            storage: deps.storage,
            pool: deps.pool,
            oracle: deps.oracle,
            slashing: deps.slashing,
            verifier: deps.verifier,
            time_source: deps.time_source,
            events: deps.events,
            params: deps.params,
            handlers: Vec::new(),
            chain_lock: Mutex::new(()),
            best_state: RwLock::new(state),
        }
    }

    /// Register an instruction handler. Handlers run in registration order.
    ///
    /// A handler state stored for the best block is restored into the
    /// handler; otherwise the handler's current state is stored for it.
    pub fn with_handler(mut self, handler: Arc<dyn InstructionHandler>) -> BeaconResult<Self> {
        let best_hash = self.best_state.read().best_block_hash;
        match self.storage.fetch_handler_state(handler.name(), &best_hash)? {
            Some(stored) => {
                handler.restore(&stored)?;
                debug!(handler = handler.name(), "Restored instruction handler state");
            }
            None => {
                let mut batch = WriteBatch::new();
                self.storage.store_handler_state(
                    &mut batch,
                    handler.name(),
                    &best_hash,
                    &handler.current_state()?,
                )?;
                self.storage.put_batch(batch)?;
            }
        }
        self.handlers.push(handler);
        Ok(self)
    }

    /// Consensus parameters.
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Committee of `shard_id` in the best state.
    pub fn shard_committee(&self, shard_id: ShardId) -> Vec<CommitteeKey> {
        self.best_state.read().shard_committee_of(shard_id).to_vec()
    }

    /// Beacon committee in the best state.
    pub fn beacon_committee(&self) -> Vec<CommitteeKey> {
        self.best_state.read().beacon_committee.clone()
    }

    fn snapshot(&self) -> BeaconState {
        self.best_state.read().clone()
    }

    // === INSERTION ===

    async fn insert_block_internal(
        &self,
        block: BeaconBlock,
        is_validated: bool,
    ) -> BeaconResult<()> {
        let _guard = self.chain_lock.lock().await;
        let mut best = self.snapshot();
        let mut mode = if is_validated {
            CheckMode::PreValidated
        } else {
            CheckMode::Insert
        };

        if is_competing_fork(&block, &best) {
            best = self.switch_to_fork(&block, &best).await?;
            mode = CheckMode::PreValidated;
        }

        if block.height() != best.height + 1 {
            return Err(BeaconError::WrongBlockHeight {
                expected: best.height + 1,
                actual: block.height(),
            });
        }
        let hash = block.hash();
        if self.storage.has_block(&hash)? {
            return Err(BeaconError::DuplicateBlock(hash.into()));
        }

        if mode != CheckMode::PreValidated {
            self.run_checks(&block, &best, mode).await?;
        }

        let prior_backup = self.storage.fetch_backup()?;
        self.storage.backup_current_state(&best)?;

        match self.apply_and_commit(&block, &best, is_validated).await {
            Ok((derived, handler_states)) => {
                self.after_commit(&block, &best, derived, &handler_states);
                Ok(())
            }
            Err(e) => {
                warn!(
                    height = block.height(),
                    error = %e,
                    "Beacon block rejected after backup, restoring"
                );
                self.restore_backup(prior_backup);
                Err(e)
            }
        }
    }

    /// Validate `block` against the state before the current best block,
    /// then revert to that state.
    async fn switch_to_fork(
        &self,
        block: &BeaconBlock,
        best: &BeaconState,
    ) -> BeaconResult<BeaconState> {
        let previous = self
            .storage
            .fetch_backup()?
            .ok_or(BeaconError::MissingBackup)?;
        warn!(
            height = block.height(),
            timestamp = block.header.timestamp,
            round = block.header.round,
            best_round = best.best_block_round,
            "Competing beacon block, validating against previous state"
        );
        self.run_checks(block, &previous, CheckMode::Insert).await?;
        self.revert_to(best, previous.clone())?;
        Ok(previous)
    }

    /// Pre-processing and best-state checks. A missing parent requests a
    /// sync and, outside pre-sign, reverts the best state.
    async fn run_checks(
        &self,
        block: &BeaconBlock,
        best: &BeaconState,
        mode: CheckMode,
    ) -> BeaconResult<()> {
        let result = self.check_block(block, best, mode).await;
        if let Err(e) = &result {
            if e.is_missing_parent() {
                self.events.publish(BeaconEvent::SyncRequested {
                    missing_hashes: vec![block.header.previous_block_hash],
                    requested_by_height: block.height(),
                });
                if mode != CheckMode::PreSign {
                    match self.storage.fetch_backup() {
                        Ok(Some(previous)) => {
                            if let Err(revert_err) = self.revert_to(best, previous) {
                                warn!(error = %revert_err, "Revert after missing parent failed");
                            }
                        }
                        Ok(None) => warn!("Missing parent but no backup state to revert to"),
                        Err(storage_err) => {
                            warn!(error = %storage_err, "Reading backup state failed")
                        }
                    }
                }
            }
        }
        result
    }

    async fn check_block(
        &self,
        block: &BeaconBlock,
        best: &BeaconState,
        mode: CheckMode,
    ) -> BeaconResult<()> {
        let parent = self.fetch_block(&block.header.previous_block_hash)?;
        BlockValidator::validate_pre_processing(block, &parent, &self.params)?;
        if mode == CheckMode::PreSign {
            self.validate_instruction_set(block, best)?;
        }
        BlockValidator::validate_best_state(block, best, &self.params)?;
        debug!(height = block.height(), ?mode, "Beacon block checks passed");
        Ok(())
    }

    fn fetch_block(&self, hash: &Hash) -> BeaconResult<BeaconBlock> {
        let bytes = self.storage.fetch_block(hash).map_err(|e| match e {
            StorageError::NotFound(reason) => BeaconError::FetchBeaconBlock {
                hash: HexHash::from(*hash),
                reason,
            },
            other => BeaconError::Storage(other),
        })?;
        BeaconBlock::from_bytes(&bytes)
    }

    /// Re-derive the block's instructions from the pool and compare.
    fn validate_instruction_set(
        &self,
        block: &BeaconBlock,
        best: &BeaconState,
    ) -> BeaconResult<()> {
        if best.needs_random(best.height, &self.params) && random_instruction(block).is_none() {
            return Err(BeaconError::MissingRandomInstruction(block.height()));
        }
        let shard_blocks = self.pooled_blocks_for(block, best)?;
        let blacklist = self.slashing.producers_black_list(block.height());
        let derived = InstructionBuilder::new(&self.params, &self.handlers).build(
            best,
            BuildInputs {
                shard_blocks: &shard_blocks,
                blacklist: &blacklist,
                random: random_instruction(block).cloned(),
            },
        )?;
        let derived_hash = instructions_hash(&derived);
        if derived_hash != block.header.instruction_hash {
            return Err(BeaconError::InstructionSetMismatch {
                declared: block.header.instruction_hash.into(),
                derived: derived_hash.into(),
            });
        }
        Ok(())
    }

    /// Pooled shard-to-beacon blocks matching the block's shard states.
    fn pooled_blocks_for(
        &self,
        block: &BeaconBlock,
        best: &BeaconState,
    ) -> BeaconResult<BTreeMap<ShardId, Vec<ShardToBeaconBlock>>> {
        let mut pooled = self.pool.get_valid_blocks(&best.best_shard_height);
        let mut selected = BTreeMap::new();
        for (shard_id, states) in &block.body.shard_state {
            let available = pooled.remove(shard_id).unwrap_or_default();
            let committee = best.shard_committee_of(*shard_id);
            let mut blocks = Vec::with_capacity(states.len());
            for state in states {
                let Some(found) = available
                    .iter()
                    .find(|b| b.header.height == state.height && b.hash() == state.hash)
                else {
                    return Err(BeaconError::NotEnoughShardToBeaconBlocks {
                        shard_id: *shard_id,
                        required: states.last().map_or(state.height, |s| s.height),
                        available: available.last().map_or(0, |b| b.header.height),
                    });
                };
                if !self.verifier.verify(found, committee) {
                    return Err(BeaconError::ShardBlockSignature {
                        shard_id: *shard_id,
                        height: found.header.height,
                    });
                }
                blocks.push(found.clone());
            }
            selected.insert(*shard_id, blocks);
        }
        Ok(selected)
    }

    /// Slashing, apply to a clone, post-processing checks and the storage
    /// batch. Returns the derived state and the handler states after the
    /// block; nothing is promoted here.
    async fn apply_and_commit(
        &self,
        block: &BeaconBlock,
        best: &BeaconState,
        is_validated: bool,
    ) -> BeaconResult<(BeaconState, Vec<Vec<u8>>)> {
        let committees = best.committee_snapshot();
        if let Err(e) = self.slashing.process_slashing(&committees, block) {
            warn!(height = block.height(), error = %e, "Slashing failed");
        }

        let mut derived = best.try_clone()?;
        let effects = derived.apply_block(block, &self.params)?;

        if !is_validated {
            self.post_processing(block, &derived).await?;
        }
        check_state_invariants(best, &derived)?;

        let handler_states = self
            .handlers
            .iter()
            .map(|handler| handler.state_after(block))
            .collect::<BeaconResult<Vec<_>>>()?;

        self.persist(block, &derived, &effects, &handler_states)?;
        Ok((derived, handler_states))
    }

    async fn post_processing(
        &self,
        block: &BeaconBlock,
        derived: &BeaconState,
    ) -> BeaconResult<()> {
        BlockValidator::validate_roots(block, derived)?;
        if let Some(random) = random_instruction(block) {
            let nonce = random_nonce(random)?;
            let verified = self
                .with_oracle_timeout(
                    self.oracle
                        .verify_nonce_with_timestamp(derived.current_random_time_stamp, nonce),
                )
                .await?;
            if !verified {
                return Err(BeaconError::RandomNonceRejected(nonce));
            }
        }
        Ok(())
    }

    fn persist(
        &self,
        block: &BeaconBlock,
        derived: &BeaconState,
        effects: &BlockEffects,
        handler_states: &[Vec<u8>],
    ) -> BeaconResult<()> {
        let height = block.height();
        let hash = block.hash();
        let mut batch = WriteBatch::new();
        self.storage.store_block(&mut batch, &hash, block)?;
        self.storage.store_best_state(&mut batch, derived)?;
        self.storage
            .store_committee_by_height(&mut batch, height, &derived.committee_snapshot())?;
        self.storage
            .store_reward_receiver_by_height(&mut batch, height, &derived.reward_receiver)?;
        self.storage
            .store_auto_staking_by_height(&mut batch, height, &derived.auto_staking)?;
        for ack in &effects.cross_shard_acks {
            self.storage.store_cross_shard_next_height(
                &mut batch,
                ack.from,
                ack.to,
                ack.last_height,
                ack.wait_height,
            )?;
            self.storage.store_cross_shard_next_height(
                &mut batch,
                ack.from,
                ack.to,
                ack.wait_height,
                0,
            )?;
        }
        for (handler, state) in self.handlers.iter().zip(handler_states) {
            self.storage
                .store_handler_state(&mut batch, handler.name(), &hash, state)?;
        }
        self.storage.put_batch(batch)?;
        Ok(())
    }

    /// Promote the derived state and notify followers.
    fn after_commit(
        &self,
        block: &BeaconBlock,
        before: &BeaconState,
        derived: BeaconState,
        handler_states: &[Vec<u8>],
    ) {
        let committed = derived.committee_snapshot();
        let best_shard_height = derived.best_shard_height.clone();
        *self.best_state.write() = derived;

        for (handler, state) in self.handlers.iter().zip(handler_states) {
            if let Err(e) = handler.restore(state) {
                warn!(handler = handler.name(), error = %e, "Instruction handler failed");
            }
        }
        self.pool.prune(&best_shard_height);

        let hash = block.hash();
        info!(
            height = block.height(),
            epoch = block.header.epoch,
            hash = %HexHash::from(hash),
            instructions = block.body.instructions.len(),
            "Beacon block inserted"
        );
        self.events.publish(BeaconEvent::BeaconBlockInserted {
            height: block.height(),
            block_hash: hash,
            epoch: block.header.epoch,
        });
        if let Some(change) = before.committee_snapshot().diff(&committed) {
            debug!(
                height = block.height(),
                beacon_changed = change.beacon_changed,
                shards = ?change.changed_shards,
                "Committees changed"
            );
            self.events.publish(BeaconEvent::CommitteeChanged {
                height: block.height(),
                beacon_changed: change.beacon_changed,
                changed_shards: change.changed_shards,
            });
        }
    }

    /// Replace the best state with `previous` and drop the backup. Handlers
    /// go back to their state as of `previous`.
    fn revert_to(&self, current: &BeaconState, previous: BeaconState) -> BeaconResult<()> {
        let mut handler_states = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            let stored = self
                .storage
                .fetch_handler_state(handler.name(), &previous.best_block_hash)?;
            handler_states.push(stored);
        }

        let mut batch = WriteBatch::new();
        self.storage.store_best_state(&mut batch, &previous)?;
        self.storage.put_batch(batch)?;
        self.storage.clean_backup()?;

        for (handler, stored) in self.handlers.iter().zip(handler_states) {
            match stored {
                Some(state) => {
                    if let Err(e) = handler.restore(&state) {
                        warn!(handler = handler.name(), error = %e, "Handler revert failed");
                    }
                }
                None => warn!(
                    handler = handler.name(),
                    height = previous.height,
                    "No handler state stored for revert target"
                ),
            }
        }

        let (from_height, to_height) = (current.height, previous.height);
        *self.best_state.write() = previous;
        warn!(from_height, to_height, "Beacon state reverted");
        self.events.publish(BeaconEvent::BeaconStateReverted {
            from_height,
            to_height,
        });
        Ok(())
    }

    /// Put the backup taken before the failed insertion back in place.
    fn restore_backup(&self, prior: Option<BeaconState>) {
        let result = match prior {
            Some(state) => self.storage.backup_current_state(&state),
            None => self.storage.clean_backup(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Restoring beacon backup failed");
        }
    }

    // === PRE-SIGN VALIDATION ===

    async fn validate_for_signing_internal(&self, block: &BeaconBlock) -> BeaconResult<()> {
        let _guard = self.chain_lock.lock().await;
        let best = self.snapshot();
        self.run_checks(block, &best, CheckMode::PreSign).await?;
        let mut derived = best.try_clone()?;
        derived.apply_block(block, &self.params)?;
        self.post_processing(block, &derived).await?;
        check_state_invariants(&best, &derived)?;
        debug!(height = block.height(), "Beacon block valid for signing");
        Ok(())
    }

    /// Run an oracle call within `BlockMaxCreateTime`.
    async fn with_oracle_timeout<T>(
        &self,
        call: impl Future<Output = BeaconResult<T>>,
    ) -> BeaconResult<T> {
        match tokio::time::timeout(self.params.block_max_create_time(), call).await {
            Ok(result) => result,
            Err(_) => Err(BeaconError::RandomnessTimeout(
                self.params.block_max_create_time_ms,
            )),
        }
    }
}

/// Same height as the best block, strictly later timestamp and round.
fn is_competing_fork(block: &BeaconBlock, best: &BeaconState) -> bool {
    block.height() == best.height
        && block.header.timestamp > best.best_block_timestamp
        && block.header.round > best.best_block_round
}

#[async_trait]
impl BeaconChainApi for BeaconChain {
    async fn insert_block(&self, block: BeaconBlock, is_validated: bool) -> BeaconResult<()> {
        self.insert_block_internal(block, is_validated).await
    }

    async fn produce_block(
        &self,
        producer: &CommitteeKey,
        round: u32,
    ) -> BeaconResult<BeaconBlock> {
        self.produce_block_internal(producer, round).await
    }

    async fn validate_block_for_signing(&self, block: &BeaconBlock) -> BeaconResult<()> {
        self.validate_for_signing_internal(block).await
    }

    fn best_state(&self) -> BeaconState {
        self.snapshot()
    }

    fn best_height(&self) -> u64 {
        self.best_state.read().height
    }

    fn role_of(&self, key: &CommitteeKey) -> CommitteeRole {
        self.best_state.read().role_of(key)
    }
}
