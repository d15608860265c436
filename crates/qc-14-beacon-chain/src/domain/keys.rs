//! Committee public keys and payment addresses.
//!
//! Keys travel inside comma-separated instruction fields, so a key may not
//! be empty and may not contain a comma or whitespace.

use super::errors::InstructionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded committee public key (base58 string form).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitteeKey(String);

impl CommitteeKey {
    /// Parse a key, rejecting strings that can't survive CSV encoding.
    pub fn parse(raw: &str) -> Result<Self, InstructionError> {
        validate_item(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key bytes fed into hashes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CommitteeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CommitteeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitteeKey({})", self.0)
    }
}

impl std::str::FromStr for CommitteeKey {
    type Err = InstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Payment address that receives a staker's rewards.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentAddress(String);

impl PaymentAddress {
    /// Parse an address with the same character rules as keys.
    pub fn parse(raw: &str) -> Result<Self, InstructionError> {
        validate_item(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PaymentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentAddress({})", self.0)
    }
}

pub(crate) fn validate_item(raw: &str) -> Result<(), InstructionError> {
    if raw.is_empty() || raw.contains(',') || raw.chars().any(char::is_whitespace) {
        return Err(InstructionError::InvalidItem(raw.to_string()));
    }
    Ok(())
}

/// Join keys into one CSV field.
pub fn join_keys(keys: &[CommitteeKey]) -> String {
    keys.iter()
        .map(CommitteeKey::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Split a CSV field into keys. The empty string is the empty list.
pub fn split_keys(field: &str) -> Result<Vec<CommitteeKey>, InstructionError> {
    split_csv(field).map(CommitteeKey::parse).collect()
}

/// Split a CSV field into raw items. The empty string is the empty list.
pub(crate) fn split_csv(field: &str) -> impl Iterator<Item = &str> {
    field.split(',').filter(move |_| !field.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_separators() {
        assert!(CommitteeKey::parse("abc").is_ok());
        assert!(CommitteeKey::parse("").is_err());
        assert!(CommitteeKey::parse("a,b").is_err());
        assert!(CommitteeKey::parse("a b").is_err());
        assert!(PaymentAddress::parse("addr\n").is_err());
    }

    #[test]
    fn test_split_empty_field() {
        assert!(split_keys("").unwrap().is_empty());
    }

    #[test]
    fn test_split_join() {
        let keys = split_keys("k1,k2,k3").unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(join_keys(&keys), "k1,k2,k3");
    }

    #[test]
    fn test_split_rejects_empty_item() {
        assert!(split_keys("k1,,k3").is_err());
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = CommitteeKey::parse("a").unwrap();
        let b = CommitteeKey::parse("b").unwrap();
        assert!(a < b);
    }
}
