//! Hashing utilities for beacon blocks and state roots.
//!
//! Every digest is keccak256. Variable-length strings are length-prefixed
//! (u32 little-endian) so that `["ab", "c"]` and `["a", "bc"]` never collide.

use shared_types::{keccak256, Hash, ZERO_HASH};
use sha3::{Digest, Keccak256};

/// Append a length-prefixed string to `buf`.
#[inline]
pub fn encode_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Hash an ordered list of strings.
pub fn hash_string_list<'a>(items: impl IntoIterator<Item = &'a str>) -> Hash {
    let mut buf = Vec::new();
    for item in items {
        encode_str(&mut buf, item);
    }
    keccak256(&buf)
}

/// Merkle leaf of one instruction.
pub fn instruction_leaf(instruction: &[String]) -> Hash {
    hash_string_list(instruction.iter().map(String::as_str))
}

/// Flattened hash of an instruction list (`InstructionHash`).
///
/// Instruction boundaries are encoded, so moving an element from one
/// instruction to the next changes the hash.
pub fn instructions_hash(instructions: &[Vec<String>]) -> Hash {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(instructions.len() as u32).to_le_bytes());
    for inst in instructions {
        buf.extend_from_slice(&(inst.len() as u32).to_le_bytes());
        for item in inst {
            encode_str(&mut buf, item);
        }
    }
    keccak256(&buf)
}

/// Merkle root over instruction leaves (`InstructionMerkleRoot`).
pub fn instruction_merkle_root(instructions: &[Vec<String>]) -> Hash {
    let leaves: Vec<Hash> = instructions.iter().map(|i| instruction_leaf(i)).collect();
    compute_merkle_root(&leaves)
}

/// Compute Merkle root from list of hashes.
///
/// Odd levels duplicate their last node; the empty list hashes to zero.
pub fn compute_merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return ZERO_HASH;
    }

    if hashes.len() == 1 {
        return hashes[0];
    }

    let mut level: Vec<Hash> = hashes.to_vec();

    while level.len() > 1 {
        let mut next_level = Vec::with_capacity((level.len() + 1) / 2);

        for chunk in level.chunks(2) {
            let left = &chunk[0];
            let right = chunk.get(1).unwrap_or(left);
            next_level.push(hash_concat(left, right));
        }

        level = next_level;
    }

    level[0]
}

/// Hash concatenation.
#[inline]
pub fn hash_concat(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(left);
    hasher.update(right);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}
