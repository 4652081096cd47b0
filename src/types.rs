//! Core data types: addresses, ciphertext handles, proposals, and tallies.

use crate::errors::VotingError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 20-byte account or contract address.
///
/// Displayed and serialized as a lowercase `0x`-prefixed hex string, so
/// equality is case-insensitive by construction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    /// The all-zero address, used by deployments to mark "not deployed".
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn new(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = VotingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(stripped).map_err(|_| VotingError::InvalidAddress(s.to_string()))?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| VotingError::InvalidAddress(s.to_string()))?;
        Ok(Address(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e: VotingError| D::Error::custom(e.to_string()))
    }
}

/// An opaque 32-byte reference to an encrypted value held by the contract.
///
/// The all-zero handle is a reserved sentinel meaning "no encrypted value has
/// been produced yet". It is never sent to the decryption service and is
/// treated as an already-cleared value of zero. That reservation is a contract
/// with the encryption layer, not something this client can re-derive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CiphertextHandle([u8; 32]);

impl CiphertextHandle {
    /// The sentinel handle: no encrypted value produced yet.
    pub const ZERO: CiphertextHandle = CiphertextHandle([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        CiphertextHandle(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True if this is the reserved all-zero sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CiphertextHandle({self})")
    }
}

impl FromStr for CiphertextHandle {
    type Err = VotingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(stripped).map_err(|_| VotingError::InvalidHandle(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VotingError::InvalidHandle(s.to_string()))?;
        Ok(CiphertextHandle(arr))
    }
}

impl Serialize for CiphertextHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CiphertextHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e: VotingError| D::Error::custom(e.to_string()))
    }
}

/// A proposal as read from the contract.
///
/// Ids are contract-assigned and monotonically increasing from 0. Metadata is
/// immutable once fetched; only `has_voted` may flip after a successful vote.
/// `start_time <= end_time` is enforced by the contract and not re-validated
/// here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub creator: Address,
    pub title: String,
    pub description: String,
    /// Voting window start, epoch seconds.
    pub start_time: u64,
    /// Voting window end, epoch seconds.
    pub end_time: u64,
    /// Whether the active account has voted. `None` when no account is
    /// connected (skipped, never defaulted).
    pub has_voted: Option<bool>,
}

/// The pair of yes/no ciphertext handles cached for a proposal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedTally {
    pub yes: Option<CiphertextHandle>,
    pub no: Option<CiphertextHandle>,
}

/// A decrypted value paired with the handle it was decrypted from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearValue {
    pub handle: CiphertextHandle,
    pub value: u64,
}

/// Decrypted yes/no tallies for a proposal.
///
/// A side left `None` has not been decrypted yet. Valid only while the
/// (account, network) pair under which decryption was requested is still
/// active; stale values are discarded, never displayed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearTally {
    pub yes: Option<ClearValue>,
    pub no: Option<ClearValue>,
}

/// A vote cast by the active account, derived from emitted vote events.
///
/// Recomputed on refresh, never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub proposal_id: u64,
    pub is_yes: bool,
    pub tx_hash: String,
    pub block_number: u64,
}

/// Receipt for a mined transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
}
