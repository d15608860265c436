//! # PDE Contribution Handler
//!
//! Pairs double-sided liquidity contributions sent by shards and tracks pool
//! reserves as beacon blocks commit.
//!
//! ```text
//! shard:  ["90", {pair_id, token_id, amount, contributor, tx_id}]
//! beacon: ["90", "waiting", contribution]
//!         ["90", "matched", {pair_id, token_a, amount_a, token_b, amount_b}]
//!         ["90", "refund",  contribution]
//! ```
//!
//! The first contribution for a pair id waits. The second one matches when
//! it brings the other token and respects the pool ratio
//! (`amount_a * reserve_b == amount_b * reserve_a`, any ratio for a new
//! pool); otherwise both contributions are refunded and reserves are left
//! untouched.
//!
//! Instruction building reads committed state only, so producer and
//! pre-sign validator derive the same instructions.

use crate::domain::{BeaconBlock, BeaconError, BeaconResult, DecodedInstruction, Instruction};
use crate::ports::InstructionHandler;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared_types::ShardId;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Metadata type of PDE contribution instructions.
pub const PDE_CONTRIBUTION_META: u32 = 90;

/// Contribution is waiting for its counterpart.
pub const STATUS_WAITING: &str = "waiting";
/// Both sides were accepted into the pool.
pub const STATUS_MATCHED: &str = "matched";
/// Contribution returned to its sender.
pub const STATUS_REFUND: &str = "refund";

/// One side of a double-sided contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    /// Identifier pairing the two sides.
    pub pair_id: String,
    /// Contributed token.
    pub token_id: String,
    /// Contributed amount.
    pub amount: u64,
    /// Contributor payment address.
    pub contributor: String,
    /// Contribution transaction id.
    pub tx_id: String,
}

impl Contribution {
    /// Shard-side request instruction.
    pub fn to_request(&self) -> BeaconResult<Instruction> {
        Ok(vec![PDE_CONTRIBUTION_META.to_string(), to_json(self)?])
    }
}

/// Accepted pair, tokens in ascending id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedContribution {
    /// Pair identifier.
    pub pair_id: String,
    /// Lower token id.
    pub token_a: String,
    /// Amount of `token_a`.
    pub amount_a: u64,
    /// Higher token id.
    pub token_b: String,
    /// Amount of `token_b`.
    pub amount_b: u64,
}

/// Committed PDE state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdeState {
    /// First contributions waiting for their counterpart, by pair id.
    pub waiting: BTreeMap<String, Contribution>,
    /// Reserves by `(token_a, token_b)`, token ids ascending.
    pub reserves: BTreeMap<(String, String), (u64, u64)>,
}

impl PdeState {
    fn reserve(&self, token_a: &str, token_b: &str) -> (u64, u64) {
        self.reserves
            .get(&(token_a.to_string(), token_b.to_string()))
            .copied()
            .unwrap_or((0, 0))
    }

    /// Pair two contributions. `None` when they must be refunded.
    fn try_match(
        &self,
        first: &Contribution,
        second: &Contribution,
    ) -> Option<MatchedContribution> {
        if first.token_id == second.token_id || first.amount == 0 || second.amount == 0 {
            return None;
        }
        let (a, b) = if first.token_id < second.token_id {
            (first, second)
        } else {
            (second, first)
        };
        let (reserve_a, reserve_b) = self.reserve(&a.token_id, &b.token_id);
        let is_new_pool = reserve_a == 0 && reserve_b == 0;
        let ratio_holds = u128::from(a.amount) * u128::from(reserve_b)
            == u128::from(b.amount) * u128::from(reserve_a);
        if !is_new_pool && !ratio_holds {
            return None;
        }
        Some(MatchedContribution {
            pair_id: a.pair_id.clone(),
            token_a: a.token_id.clone(),
            amount_a: a.amount,
            token_b: b.token_id.clone(),
            amount_b: b.amount,
        })
    }

    fn apply_match(&mut self, matched: &MatchedContribution) {
        let reserve = self
            .reserves
            .entry((matched.token_a.clone(), matched.token_b.clone()))
            .or_insert((0, 0));
        reserve.0 = reserve.0.saturating_add(matched.amount_a);
        reserve.1 = reserve.1.saturating_add(matched.amount_b);
        self.waiting.remove(&matched.pair_id);
    }
}

/// Instruction handler for PDE contributions.
#[derive(Default)]
pub struct PdeContributionHandler {
    state: RwLock<PdeState>,
}

impl PdeContributionHandler {
    /// Handler with no pools.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler with one pre-existing pool.
    pub fn with_pool(token_a: &str, token_b: &str, reserve_a: u64, reserve_b: u64) -> Self {
        let handler = Self::new();
        let (key, reserve) = if token_a <= token_b {
            ((token_a.to_string(), token_b.to_string()), (reserve_a, reserve_b))
        } else {
            ((token_b.to_string(), token_a.to_string()), (reserve_b, reserve_a))
        };
        handler.state.write().reserves.insert(key, reserve);
        handler
    }

    /// Reserves of the `(token_a, token_b)` pool, in argument order.
    pub fn reserves(&self, token_a: &str, token_b: &str) -> Option<(u64, u64)> {
        let state = self.state.read();
        if token_a <= token_b {
            state
                .reserves
                .get(&(token_a.to_string(), token_b.to_string()))
                .copied()
        } else {
            state
                .reserves
                .get(&(token_b.to_string(), token_a.to_string()))
                .map(|(a, b)| (*b, *a))
        }
    }

    /// Copy of the committed state.
    pub fn snapshot(&self) -> PdeState {
        self.state.read().clone()
    }
}

impl InstructionHandler for PdeContributionHandler {
    fn name(&self) -> &'static str {
        "pde-contribution"
    }

    fn build_instructions(
        &self,
        beacon_height: u64,
        shard_instructions: &[(ShardId, Instruction)],
    ) -> Vec<Instruction> {
        // Local copy: contributions of this block may pair with each other.
        let mut scratch = self.state.read().clone();
        let mut out = Vec::new();

        for (shard_id, inst) in shard_instructions {
            let Some(contribution) = parse_request(inst) else {
                continue;
            };
            let built = match scratch.waiting.get(&contribution.pair_id).cloned() {
                None => {
                    scratch
                        .waiting
                        .insert(contribution.pair_id.clone(), contribution.clone());
                    beacon_instruction(STATUS_WAITING, &contribution).map(|i| vec![i])
                }
                Some(first) => match scratch.try_match(&first, &contribution) {
                    Some(matched) => {
                        scratch.apply_match(&matched);
                        beacon_instruction(STATUS_MATCHED, &matched).map(|i| vec![i])
                    }
                    None => {
                        scratch.waiting.remove(&contribution.pair_id);
                        beacon_instruction(STATUS_REFUND, &first).and_then(|a| {
                            beacon_instruction(STATUS_REFUND, &contribution).map(|b| vec![a, b])
                        })
                    }
                },
            };
            match built {
                Ok(instructions) => out.extend(instructions),
                Err(e) => warn!(
                    shard_id,
                    beacon_height,
                    error = %e,
                    "Dropping PDE contribution"
                ),
            }
        }
        out
    }

    fn state_after(&self, block: &BeaconBlock) -> BeaconResult<Vec<u8>> {
        encode_state(&self.followed(block)?)
    }

    fn current_state(&self) -> BeaconResult<Vec<u8>> {
        encode_state(&self.state.read())
    }

    fn restore(&self, state: &[u8]) -> BeaconResult<()> {
        let restored: PdeState = bincode::deserialize(state)
            .map_err(|e| BeaconError::InvalidState(format!("PDE state: {}", e)))?;
        *self.state.write() = restored;
        Ok(())
    }

    fn on_block_committed(&self, block: &BeaconBlock) -> BeaconResult<()> {
        let next = self.followed(block)?;
        debug!(
            height = block.height(),
            waiting = next.waiting.len(),
            pools = next.reserves.len(),
            "PDE state updated"
        );
        *self.state.write() = next;
        Ok(())
    }
}

impl PdeContributionHandler {
    /// Committed state after the PDE instructions of `block`. Every
    /// instruction is decoded before anything is applied.
    fn followed(&self, block: &BeaconBlock) -> BeaconResult<PdeState> {
        let mut updates = Vec::new();
        for inst in &block.body.instructions {
            let Ok(DecodedInstruction::Metadata { meta_type, fields }) =
                DecodedInstruction::parse(inst)
            else {
                continue;
            };
            if meta_type != PDE_CONTRIBUTION_META || fields.len() != 2 {
                continue;
            }
            let update = match fields[0].as_str() {
                STATUS_WAITING => PdeUpdate::Waiting(from_json(&fields[1])?),
                STATUS_MATCHED => PdeUpdate::Matched(from_json(&fields[1])?),
                STATUS_REFUND => PdeUpdate::Refund(from_json(&fields[1])?),
                other => {
                    return Err(BeaconError::InvalidState(format!(
                        "unknown PDE status {}",
                        other
                    )));
                }
            };
            updates.push(update);
        }

        let mut next = self.state.read().clone();
        for update in updates {
            match update {
                PdeUpdate::Waiting(contribution) => {
                    next.waiting
                        .insert(contribution.pair_id.clone(), contribution);
                }
                PdeUpdate::Matched(matched) => next.apply_match(&matched),
                PdeUpdate::Refund(contribution) => {
                    next.waiting.remove(&contribution.pair_id);
                }
            }
        }
        Ok(next)
    }
}

/// Decoded beacon-side PDE instruction.
enum PdeUpdate {
    Waiting(Contribution),
    Matched(MatchedContribution),
    Refund(Contribution),
}

fn encode_state(state: &PdeState) -> BeaconResult<Vec<u8>> {
    bincode::serialize(state).map_err(|e| BeaconError::InvalidState(format!("PDE state: {}", e)))
}

/// Parse a shard-side contribution request. Anything else is ignored.
fn parse_request(inst: &Instruction) -> Option<Contribution> {
    if inst.len() != 2 || inst[0] != PDE_CONTRIBUTION_META.to_string() {
        return None;
    }
    serde_json::from_str(&inst[1]).ok()
}

fn beacon_instruction<T: Serialize>(status: &str, payload: &T) -> BeaconResult<Instruction> {
    Ok(vec![
        PDE_CONTRIBUTION_META.to_string(),
        status.to_string(),
        to_json(payload)?,
    ])
}

fn to_json<T: Serialize>(value: &T) -> BeaconResult<String> {
    serde_json::to_string(value).map_err(|e| BeaconError::InvalidState(e.to_string()))
}

fn from_json<'a, T: Deserialize<'a>>(raw: &'a str) -> BeaconResult<T> {
    serde_json::from_str(raw).map_err(|e| BeaconError::InvalidState(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;
    use crate::test_utils::{genesis_state, next_block};

    fn contribution(pair_id: &str, token_id: &str, amount: u64) -> Contribution {
        Contribution {
            pair_id: pair_id.to_string(),
            token_id: token_id.to_string(),
            amount,
            contributor: format!("addr-{}", token_id),
            tx_id: format!("tx-{}-{}", pair_id, token_id),
        }
    }

    fn requests(contributions: &[Contribution]) -> Vec<(ShardId, Instruction)> {
        contributions
            .iter()
            .map(|c| (0, c.to_request().unwrap()))
            .collect()
    }

    fn commit(handler: &PdeContributionHandler, instructions: Vec<Instruction>) {
        let params = ChainParams::for_testing();
        let block = next_block(&genesis_state(), &params, instructions);
        handler.on_block_committed(&block).unwrap();
    }

    #[test]
    fn test_matched_contribution_grows_reserves() {
        let handler = PdeContributionHandler::with_pool("tokenA", "tokenB", 1_000, 2_000);
        let built = handler.build_instructions(
            2,
            &requests(&[
                contribution("p1", "tokenA", 100),
                contribution("p1", "tokenB", 200),
            ]),
        );

        assert_eq!(built.len(), 2);
        assert_eq!(built[0][1], STATUS_WAITING);
        assert_eq!(built[1][1], STATUS_MATCHED);
        // Building alone never touches committed reserves.
        assert_eq!(handler.reserves("tokenA", "tokenB"), Some((1_000, 2_000)));

        commit(&handler, built);
        assert_eq!(handler.reserves("tokenA", "tokenB"), Some((1_100, 2_200)));
        assert!(handler.snapshot().waiting.is_empty());
    }

    #[test]
    fn test_mismatched_ratio_refunds_both() {
        let handler = PdeContributionHandler::with_pool("tokenA", "tokenB", 1_000, 2_000);
        let built = handler.build_instructions(
            2,
            &requests(&[
                contribution("p1", "tokenA", 100),
                contribution("p1", "tokenB", 300),
            ]),
        );

        let refunds: Vec<_> = built.iter().filter(|i| i[1] == STATUS_REFUND).collect();
        assert_eq!(refunds.len(), 2);
        assert!(built.iter().all(|i| i[1] != STATUS_MATCHED));

        commit(&handler, built);
        assert_eq!(handler.reserves("tokenA", "tokenB"), Some((1_000, 2_000)));
        assert!(handler.snapshot().waiting.is_empty());
    }

    #[test]
    fn test_waiting_survives_across_blocks() {
        let handler = PdeContributionHandler::new();
        let first = handler.build_instructions(2, &requests(&[contribution("p9", "x", 5)]));
        commit(&handler, first);
        assert_eq!(handler.snapshot().waiting.len(), 1);

        let second = handler.build_instructions(3, &requests(&[contribution("p9", "y", 7)]));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0][1], STATUS_MATCHED);
        commit(&handler, second);
        // New pool accepts any ratio; reserves are reported in argument order.
        assert_eq!(handler.reserves("y", "x"), Some((7, 5)));
    }

    #[test]
    fn test_same_token_twice_is_refunded() {
        let handler = PdeContributionHandler::new();
        let built = handler.build_instructions(
            2,
            &requests(&[contribution("p1", "x", 5), contribution("p1", "x", 5)]),
        );
        assert_eq!(
            built.iter().filter(|i| i[1] == STATUS_REFUND).count(),
            2
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let handler = PdeContributionHandler::with_pool("a", "b", 10, 10);
        let input = requests(&[
            contribution("p1", "a", 1),
            contribution("p2", "a", 3),
            contribution("p1", "b", 1),
        ]);
        assert_eq!(
            handler.build_instructions(2, &input),
            handler.build_instructions(2, &input)
        );
    }

    #[test]
    fn test_malformed_instruction_applies_nothing() {
        let handler = PdeContributionHandler::new();
        let mut built = handler.build_instructions(2, &requests(&[contribution("p1", "x", 5)]));
        built.push(vec![
            PDE_CONTRIBUTION_META.to_string(),
            STATUS_MATCHED.to_string(),
            "not json".to_string(),
        ]);

        let params = ChainParams::for_testing();
        let block = next_block(&genesis_state(), &params, built);
        assert!(handler.on_block_committed(&block).is_err());
        assert!(handler.state_after(&block).is_err());
        assert!(handler.snapshot().waiting.is_empty());
    }

    #[test]
    fn test_state_after_leaves_handler_untouched() {
        let handler = PdeContributionHandler::new();
        let built = handler.build_instructions(2, &requests(&[contribution("p1", "x", 5)]));
        let params = ChainParams::for_testing();
        let block = next_block(&genesis_state(), &params, built);

        let before = handler.current_state().unwrap();
        let after = handler.state_after(&block).unwrap();
        assert!(handler.snapshot().waiting.is_empty());

        handler.restore(&after).unwrap();
        assert_eq!(handler.snapshot().waiting.len(), 1);
        handler.restore(&before).unwrap();
        assert!(handler.snapshot().waiting.is_empty());
    }

    #[test]
    fn test_foreign_instructions_ignored() {
        let handler = PdeContributionHandler::new();
        let input = vec![(1, vec!["37".to_string(), "x".to_string()])];
        assert!(handler.build_instructions(2, &input).is_empty());
    }
}
