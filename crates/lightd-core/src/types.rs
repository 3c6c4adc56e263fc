//! Request and response shapes exchanged with light clients.
//!
//! Hashes are kept in the chain's native (little-endian) byte order. The
//! node's JSON interface prints them reversed ("display order"); use
//! [`Hash256::to_display_hex`] and [`Hash256::from_display_hex`] at that
//! boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte block or transaction hash in native byte order.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Build a hash from a slice, which must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Hex in the reversed byte order the node uses for txids and block hashes.
    pub fn to_display_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    /// Parse a node-style (reversed) hex hash.
    pub fn from_display_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let mut hash = Self::from_slice(&bytes)?;
        hash.0.reverse();
        Some(hash)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_hex())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Identifies a block by height or by hash.
///
/// A height of zero together with no hash means "unspecified".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockId {
    pub height: u64,
    pub hash: Option<Vec<u8>>,
}

impl BlockId {
    pub fn at_height(height: u64) -> Self {
        Self { height, hash: None }
    }

    pub fn with_hash(hash: impl Into<Vec<u8>>) -> Self {
        Self {
            height: 0,
            hash: Some(hash.into()),
        }
    }

    /// True when a non-empty hash was supplied.
    pub fn has_hash(&self) -> bool {
        self.hash.as_ref().is_some_and(|h| !h.is_empty())
    }
}

/// Inclusive height range.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockRange {
    pub start: BlockId,
    pub end: BlockId,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start: BlockId::at_height(start),
            end: BlockId::at_height(end),
        }
    }
}

/// Selects a single transaction.
///
/// Either a raw txid (`hash`, native byte order), or a block reference plus
/// the transaction's index within that block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxFilter {
    pub block: Option<BlockId>,
    pub index: u64,
    pub hash: Option<Vec<u8>>,
}

impl TxFilter {
    pub fn by_hash(hash: impl Into<Vec<u8>>) -> Self {
        Self {
            hash: Some(hash.into()),
            ..Self::default()
        }
    }

    pub fn by_block(block: BlockId, index: u64) -> Self {
        Self {
            block: Some(block),
            index,
            hash: None,
        }
    }
}

/// Full serialized transaction plus the height of the block that mined it.
///
/// A height of zero means the node did not report one (mempool or unknown).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawTransaction {
    pub data: Vec<u8>,
    pub height: u64,
}

/// Outcome of submitting a transaction to the node.
///
/// `error_code == 0` is success, in which case `error_message` carries the
/// node's raw reply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendResponse {
    pub error_code: i32,
    pub error_message: String,
}

/// Transparent address plus the height range to search.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransparentAddressBlockFilter {
    pub address: String,
    pub range: BlockRange,
}

/// Description of this server and the chain it follows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LightdInfo {
    pub version: String,
    pub vendor: String,
    pub taddr_support: bool,
    pub chain_name: String,
    pub sapling_activation_height: u64,
    pub consensus_branch_id: String,
    pub block_height: u64,
}
