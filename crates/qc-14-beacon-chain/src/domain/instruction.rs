//! # Instruction Codec
//!
//! Instructions are ordered string arrays. The first element is the action
//! tag; the rest are fixed-position fields, list fields being comma-joined.
//!
//! | Action | Layout |
//! |--------|--------|
//! | `stake` | `[stake, keys, shard\|beacon, tx_ids, receivers, flags]` |
//! | `swap` | `[swap, in_keys, out_keys, beacon]` / `[swap, in_keys, out_keys, shard, shard_id]` |
//! | `random` | `[random, nonce, block_height, timestamp, chain_timestamp]` |
//! | `assign` | `[assign, candidates, shard, shard_id]` |
//! | `stopautostake` | `[stopautostake, keys]` |
//! | metadata | `[<number>, fields...]` |
//!
//! Parsing is pure and never panics; a malformed instruction is reported as
//! an [`InstructionError`] and the caller decides whether to drop it.

use super::errors::InstructionError;
use super::keys::{join_keys, split_csv, split_keys, validate_item, CommitteeKey, PaymentAddress};
use serde::{Deserialize, Serialize};
use shared_types::ShardId;

/// Raw instruction as carried in a block body.
pub type Instruction = Vec<String>;

/// `stake` action tag.
pub const STAKE_ACTION: &str = "stake";
/// `swap` action tag.
pub const SWAP_ACTION: &str = "swap";
/// `random` action tag.
pub const RANDOM_ACTION: &str = "random";
/// `assign` action tag.
pub const ASSIGN_ACTION: &str = "assign";
/// `stopautostake` action tag.
pub const STOP_AUTO_STAKE_ACTION: &str = "stopautostake";

const SHARD_ROLE: &str = "shard";
const BEACON_ROLE: &str = "beacon";

/// Chain a stake or swap targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainRole {
    /// Shard candidate pool.
    Shard,
    /// Beacon candidate pool.
    Beacon,
}

impl ChainRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::Shard => SHARD_ROLE,
            Self::Beacon => BEACON_ROLE,
        }
    }

    fn parse(action: &str, raw: &str) -> Result<Self, InstructionError> {
        match raw {
            SHARD_ROLE => Ok(Self::Shard),
            BEACON_ROLE => Ok(Self::Beacon),
            other => Err(InstructionError::InvalidRole {
                action: action.to_string(),
                role: other.to_string(),
            }),
        }
    }
}

/// Committee a swap rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapTarget {
    /// The beacon committee.
    Beacon,
    /// One shard committee.
    Shard(ShardId),
}

/// One staker of a `stake` instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staker {
    /// Committee public key.
    pub key: CommitteeKey,
    /// Staking transaction id.
    pub tx_id: String,
    /// Reward receiver.
    pub reward_receiver: PaymentAddress,
    /// Re-enter the candidate pool when swapped out.
    pub auto_staking: bool,
}

/// Typed form of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodedInstruction {
    /// New stakers joining a candidate pool.
    Stake {
        /// Target pool.
        role: ChainRole,
        /// Stakers, in instruction order.
        stakers: Vec<Staker>,
    },
    /// Committee rotation.
    Swap {
        /// Keys entering the committee (taken from pending).
        in_keys: Vec<CommitteeKey>,
        /// Keys leaving the committee or evicted from pending.
        out_keys: Vec<CommitteeKey>,
        /// Rotated committee.
        target: SwapTarget,
    },
    /// Epoch random number.
    Random {
        /// Oracle nonce, the shuffle seed.
        nonce: i64,
        /// Oracle chain block height carrying the nonce.
        block_height: u64,
        /// Beacon checkpoint timestamp the nonce was fetched for.
        timestamp: i64,
        /// Oracle chain block timestamp.
        chain_timestamp: i64,
    },
    /// Shard candidates placed into a shard's pending list.
    Assign {
        /// Assigned candidates.
        candidates: Vec<CommitteeKey>,
        /// Target shard.
        shard_id: ShardId,
    },
    /// Auto-staking switched off.
    StopAutoStake {
        /// Affected keys.
        keys: Vec<CommitteeKey>,
    },
    /// Metadata instruction for pluggable handlers (rewards, PDE, bridge).
    Metadata {
        /// Numeric metadata type.
        meta_type: u32,
        /// Remaining fields, opaque to the core.
        fields: Vec<String>,
    },
}

impl DecodedInstruction {
    /// Parse a raw instruction.
    pub fn parse(instruction: &[String]) -> Result<Self, InstructionError> {
        let action = instruction.first().ok_or(InstructionError::Empty)?;
        match action.as_str() {
            STAKE_ACTION => parse_stake(instruction),
            SWAP_ACTION => parse_swap(instruction),
            RANDOM_ACTION => parse_random(instruction),
            ASSIGN_ACTION => parse_assign(instruction),
            STOP_AUTO_STAKE_ACTION => {
                expect_len(instruction, 2)?;
                let keys = split_keys(&instruction[1])?;
                if keys.is_empty() {
                    return Err(InstructionError::EmptyList("stop auto-stake key"));
                }
                Ok(Self::StopAutoStake { keys })
            }
            other => match other.parse::<u32>() {
                Ok(meta_type) => Ok(Self::Metadata {
                    meta_type,
                    fields: instruction[1..].to_vec(),
                }),
                Err(_) => Err(InstructionError::UnknownAction(other.to_string())),
            },
        }
    }

    /// Encode back into the raw string array.
    pub fn encode(&self) -> Instruction {
        match self {
            Self::Stake { role, stakers } => {
                let keys: Vec<_> = stakers.iter().map(|s| s.key.as_str()).collect();
                let tx_ids: Vec<_> = stakers.iter().map(|s| s.tx_id.as_str()).collect();
                let receivers: Vec<_> =
                    stakers.iter().map(|s| s.reward_receiver.as_str()).collect();
                let flags: Vec<_> = stakers
                    .iter()
                    .map(|s| if s.auto_staking { "true" } else { "false" })
                    .collect();
                vec![
                    STAKE_ACTION.to_string(),
                    keys.join(","),
                    role.as_str().to_string(),
                    tx_ids.join(","),
                    receivers.join(","),
                    flags.join(","),
                ]
            }
            Self::Swap {
                in_keys,
                out_keys,
                target,
            } => {
                let mut inst = vec![
                    SWAP_ACTION.to_string(),
                    join_keys(in_keys),
                    join_keys(out_keys),
                ];
                match target {
                    SwapTarget::Beacon => inst.push(BEACON_ROLE.to_string()),
                    SwapTarget::Shard(shard_id) => {
                        inst.push(SHARD_ROLE.to_string());
                        inst.push(shard_id.to_string());
                    }
                }
                inst
            }
            Self::Random {
                nonce,
                block_height,
                timestamp,
                chain_timestamp,
            } => vec![
                RANDOM_ACTION.to_string(),
                nonce.to_string(),
                block_height.to_string(),
                timestamp.to_string(),
                chain_timestamp.to_string(),
            ],
            Self::Assign {
                candidates,
                shard_id,
            } => vec![
                ASSIGN_ACTION.to_string(),
                join_keys(candidates),
                SHARD_ROLE.to_string(),
                shard_id.to_string(),
            ],
            Self::StopAutoStake { keys } => {
                vec![STOP_AUTO_STAKE_ACTION.to_string(), join_keys(keys)]
            }
            Self::Metadata { meta_type, fields } => {
                let mut inst = Vec::with_capacity(fields.len() + 1);
                inst.push(meta_type.to_string());
                inst.extend(fields.iter().cloned());
                inst
            }
        }
    }

    /// Action tag of this instruction.
    pub fn action(&self) -> String {
        match self {
            Self::Stake { .. } => STAKE_ACTION.to_string(),
            Self::Swap { .. } => SWAP_ACTION.to_string(),
            Self::Random { .. } => RANDOM_ACTION.to_string(),
            Self::Assign { .. } => ASSIGN_ACTION.to_string(),
            Self::StopAutoStake { .. } => STOP_AUTO_STAKE_ACTION.to_string(),
            Self::Metadata { meta_type, .. } => meta_type.to_string(),
        }
    }
}

fn expect_len(instruction: &[String], expected: usize) -> Result<(), InstructionError> {
    if instruction.len() != expected {
        return Err(InstructionError::WrongLength {
            action: instruction[0].clone(),
            expected,
            actual: instruction.len(),
        });
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(
    field: &'static str,
    raw: &str,
) -> Result<T, InstructionError> {
    raw.parse().map_err(|_| InstructionError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

fn parse_stake(instruction: &[String]) -> Result<DecodedInstruction, InstructionError> {
    expect_len(instruction, 6)?;
    let role = ChainRole::parse(STAKE_ACTION, &instruction[2])?;

    let keys = split_keys(&instruction[1])?;
    let tx_ids: Vec<&str> = split_csv(&instruction[3]).collect();
    let receivers: Vec<&str> = split_csv(&instruction[4]).collect();
    let flags: Vec<&str> = split_csv(&instruction[5]).collect();

    if keys.len() != tx_ids.len() || keys.len() != receivers.len() || keys.len() != flags.len()
    {
        return Err(InstructionError::StakeListMismatch {
            keys: keys.len(),
            tx_ids: tx_ids.len(),
            receivers: receivers.len(),
            flags: flags.len(),
        });
    }
    if keys.is_empty() {
        return Err(InstructionError::EmptyList("stake key"));
    }

    let mut stakers = Vec::with_capacity(keys.len());
    for (((key, tx_id), receiver), flag) in keys.into_iter().zip(tx_ids).zip(receivers).zip(flags)
    {
        validate_item(tx_id)?;
        let auto_staking = match flag {
            "true" => true,
            "false" => false,
            other => return Err(InstructionError::InvalidFlag(other.to_string())),
        };
        stakers.push(Staker {
            key,
            tx_id: tx_id.to_string(),
            reward_receiver: PaymentAddress::parse(receiver)?,
            auto_staking,
        });
    }
    Ok(DecodedInstruction::Stake { role, stakers })
}

fn parse_swap(instruction: &[String]) -> Result<DecodedInstruction, InstructionError> {
    if instruction.len() < 4 {
        return Err(InstructionError::WrongLength {
            action: SWAP_ACTION.to_string(),
            expected: 4,
            actual: instruction.len(),
        });
    }
    let target = match ChainRole::parse(SWAP_ACTION, &instruction[3])? {
        ChainRole::Beacon => {
            expect_len(instruction, 4)?;
            SwapTarget::Beacon
        }
        ChainRole::Shard => {
            expect_len(instruction, 5)?;
            SwapTarget::Shard(parse_number("shard id", &instruction[4])?)
        }
    };
    let in_keys = split_keys(&instruction[1])?;
    let out_keys = split_keys(&instruction[2])?;
    if in_keys.is_empty() && out_keys.is_empty() {
        return Err(InstructionError::EmptySwap);
    }
    Ok(DecodedInstruction::Swap {
        in_keys,
        out_keys,
        target,
    })
}

fn parse_random(instruction: &[String]) -> Result<DecodedInstruction, InstructionError> {
    expect_len(instruction, 5)?;
    Ok(DecodedInstruction::Random {
        nonce: parse_number("nonce", &instruction[1])?,
        block_height: parse_number("block height", &instruction[2])?,
        timestamp: parse_number("timestamp", &instruction[3])?,
        chain_timestamp: parse_number("chain timestamp", &instruction[4])?,
    })
}

fn parse_assign(instruction: &[String]) -> Result<DecodedInstruction, InstructionError> {
    expect_len(instruction, 4)?;
    if instruction[2] != SHARD_ROLE {
        return Err(InstructionError::InvalidRole {
            action: ASSIGN_ACTION.to_string(),
            role: instruction[2].clone(),
        });
    }
    let candidates = split_keys(&instruction[1])?;
    if candidates.is_empty() {
        return Err(InstructionError::EmptyList("assign candidate"));
    }
    Ok(DecodedInstruction::Assign {
        candidates,
        shard_id: parse_number("shard id", &instruction[3])?,
    })
}

/// Build a raw instruction from string literals.
pub fn instruction_from<S: AsRef<str>>(parts: &[S]) -> Instruction {
    parts.iter().map(|p| p.as_ref().to_string()).collect()
}
