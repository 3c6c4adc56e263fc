//! Compact block construction from verbose node blocks.
//!
//! The node's `getblock <height> 2` reply carries every transaction with its
//! Sapling spends and outputs already decoded. Hashes in that JSON are in
//! display (byte-reversed) order; compact blocks store them natively.

use serde::Deserialize;

use lightd_core::compact::{
    BlockParser, CompactBlock, CompactOutput, CompactSpend, CompactTx,
};
use lightd_core::constants::{COMPACT_BLOCK_PROTO_VERSION, COMPACT_NOTE_SIZE};
use lightd_core::error::ParseError;
use lightd_core::types::Hash256;

#[derive(Debug, Deserialize)]
struct VerboseBlock {
    hash: Option<String>,
    height: Option<u64>,
    /// Absent on the genesis block.
    #[serde(default)]
    previousblockhash: Option<String>,
    #[serde(default)]
    time: u32,
    #[serde(default)]
    tx: Vec<VerboseTx>,
}

#[derive(Debug, Deserialize)]
struct VerboseTx {
    txid: String,
    #[serde(rename = "vShieldedSpend", default)]
    spends: Vec<VerboseSpend>,
    #[serde(rename = "vShieldedOutput", default)]
    outputs: Vec<VerboseOutput>,
}

#[derive(Debug, Deserialize)]
struct VerboseSpend {
    nullifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerboseOutput {
    cmu: String,
    ephemeral_key: String,
    enc_ciphertext: String,
}

/// [`BlockParser`] for the node's verbose JSON block format.
#[derive(Clone, Copy, Debug, Default)]
pub struct VerboseBlockParser;

impl VerboseBlockParser {
    pub fn new() -> Self {
        Self
    }
}

impl BlockParser for VerboseBlockParser {
    fn parse_block(&self, raw: &[u8]) -> Result<CompactBlock, ParseError> {
        let block: VerboseBlock =
            serde_json::from_slice(raw).map_err(|e| ParseError::Json(e.to_string()))?;

        let hash = block.hash.ok_or(ParseError::MissingField("hash"))?;
        let height = block.height.ok_or(ParseError::MissingField("height"))?;
        let prev_hash = match block.previousblockhash {
            Some(prev) => display_hash("previousblockhash", &prev)?,
            None => Hash256::ZERO,
        };

        let vtx = block
            .tx
            .iter()
            .enumerate()
            .map(|(index, tx)| compact_tx(index as u64, tx))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompactBlock {
            proto_version: COMPACT_BLOCK_PROTO_VERSION,
            height,
            hash: display_hash("hash", &hash)?,
            prev_hash,
            time: block.time,
            header: Vec::new(),
            vtx,
        })
    }
}

fn compact_tx(index: u64, tx: &VerboseTx) -> Result<CompactTx, ParseError> {
    let spends = tx
        .spends
        .iter()
        .map(|s| -> Result<CompactSpend, ParseError> {
            Ok(CompactSpend {
                nf: *display_hash("nullifier", &s.nullifier)?.as_bytes(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let outputs = tx
        .outputs
        .iter()
        .map(|o| -> Result<CompactOutput, ParseError> {
            let mut ciphertext = decode_hex("encCiphertext", &o.enc_ciphertext)?;
            if ciphertext.len() < COMPACT_NOTE_SIZE {
                return Err(ParseError::InvalidLength {
                    field: "encCiphertext",
                    expected: COMPACT_NOTE_SIZE,
                    got: ciphertext.len(),
                });
            }
            ciphertext.truncate(COMPACT_NOTE_SIZE);
            Ok(CompactOutput {
                cmu: *display_hash("cmu", &o.cmu)?.as_bytes(),
                epk: *display_hash("ephemeralKey", &o.ephemeral_key)?.as_bytes(),
                ciphertext,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CompactTx {
        index,
        hash: display_hash("txid", &tx.txid)?,
        fee: 0,
        spends,
        outputs,
    })
}

fn decode_hex(field: &'static str, s: &str) -> Result<Vec<u8>, ParseError> {
    hex::decode(s).map_err(|_| ParseError::InvalidHex { field })
}

/// Decode a 32-byte value given in display order into native order.
fn display_hash(field: &'static str, s: &str) -> Result<Hash256, ParseError> {
    let mut bytes: [u8; 32] =
        decode_hex(field, s)?
            .try_into()
            .map_err(|b: Vec<u8>| ParseError::InvalidLength {
                field,
                expected: 32,
                got: b.len(),
            })?;
    bytes.reverse();
    Ok(Hash256(bytes))
}
