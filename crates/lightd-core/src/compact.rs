//! Compact block model.
//!
//! A compact block carries just enough of a block for a light client to scan
//! for its own notes: the header fields, and per transaction the Sapling
//! nullifiers and the leading bytes of each output's note ciphertext.
//! Compact blocks are stored and streamed in their bincode encoding.

use crate::constants::{COMPACT_BLOCK_PROTO_VERSION, COMPACT_NOTE_SIZE, MAX_COMPACT_BLOCK_SIZE};
use crate::error::ParseError;
use crate::types::Hash256;

/// A Sapling spend, reduced to its nullifier.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CompactSpend {
    pub nf: [u8; 32],
}

/// A Sapling output, reduced to what trial decryption needs.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CompactOutput {
    pub cmu: [u8; 32],
    pub epk: [u8; 32],
    pub ciphertext: Vec<u8>,
}

/// Shielded parts of one transaction.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CompactTx {
    /// Position of the transaction within its block.
    pub index: u64,
    pub hash: Hash256,
    /// Fee in zatoshis, zero when not known.
    pub fee: u32,
    pub spends: Vec<CompactSpend>,
    pub outputs: Vec<CompactOutput>,
}

/// Light-client view of a single block.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CompactBlock {
    pub proto_version: u32,
    pub height: u64,
    pub hash: Hash256,
    pub prev_hash: Hash256,
    /// Block time, Unix seconds.
    pub time: u32,
    /// Serialized header without the Equihash solution; may be empty.
    pub header: Vec<u8>,
    pub vtx: Vec<CompactTx>,
}

impl CompactBlock {
    /// Serialize with the standard bincode configuration.
    pub fn encode(&self) -> Result<Vec<u8>, ParseError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ParseError::Encode(e.to_string()))
    }

    /// Decode and sanity-check a stored compact block.
    ///
    /// Checks shape only (size bound, no trailing bytes, known version, field
    /// lengths); nothing about consensus validity.
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() > MAX_COMPACT_BLOCK_SIZE {
            return Err(format!(
                "oversized: {} > {}",
                bytes.len(),
                MAX_COMPACT_BLOCK_SIZE
            ));
        }
        let (block, read): (CompactBlock, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| e.to_string())?;
        if read != bytes.len() {
            return Err(format!("{} trailing bytes", bytes.len() - read));
        }
        block.check_shape()?;
        Ok(block)
    }

    /// Transaction at `index` within this block, if present.
    pub fn tx_at(&self, index: u64) -> Option<&CompactTx> {
        self.vtx.iter().find(|tx| tx.index == index)
    }

    fn check_shape(&self) -> Result<(), String> {
        if self.proto_version != COMPACT_BLOCK_PROTO_VERSION {
            return Err(format!("unknown proto version {}", self.proto_version));
        }
        if self.hash.is_zero() {
            return Err("zero block hash".into());
        }
        for tx in &self.vtx {
            for output in &tx.outputs {
                if output.ciphertext.len() != COMPACT_NOTE_SIZE {
                    return Err(format!(
                        "tx {} output ciphertext is {} bytes, expected {}",
                        tx.index,
                        output.ciphertext.len(),
                        COMPACT_NOTE_SIZE
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Turns a block as delivered by the full node into a [`CompactBlock`].
///
/// Implementations must be pure: same input, same output.
pub trait BlockParser: Send + Sync {
    fn parse_block(&self, raw: &[u8]) -> Result<CompactBlock, ParseError>;
}
