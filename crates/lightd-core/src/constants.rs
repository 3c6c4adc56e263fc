//! Protocol and service constants.

use std::time::Duration;

/// Prefix character of a transparent address.
pub const TRANSPARENT_ADDRESS_PREFIX: char = 't';

/// Number of characters following the prefix in a transparent address.
pub const TRANSPARENT_ADDRESS_BODY_LEN: usize = 34;

/// Total length of a transparent address string.
pub const TRANSPARENT_ADDRESS_LEN: usize = 1 + TRANSPARENT_ADDRESS_BODY_LEN;

/// Version tag written into every compact block produced by this crate.
pub const COMPACT_BLOCK_PROTO_VERSION: u32 = 1;

/// Bytes of a Sapling note ciphertext kept in a compact output.
///
/// Enough for trial decryption: lead byte, diversifier, value and rseed.
pub const COMPACT_NOTE_SIZE: usize = 52;

/// Upper bound on the encoded size of one compact block.
pub const MAX_COMPACT_BLOCK_SIZE: usize = 8 * 1024 * 1024;

/// Default number of blocks the cache retains.
pub const DEFAULT_RETENTION_LIMIT: u64 = 100_000;

/// Default port for the lightd JSON-RPC server.
pub const DEFAULT_RPC_PORT: u16 = 9067;

/// Default port of the full node's RPC interface, used when the node
/// configuration omits `rpcport`.
pub const DEFAULT_NODE_RPC_PORT: u16 = 8232;

/// Ceiling on how long a single block-range stream may stay open.
pub const RANGE_STREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Consensus branch id key of the Sapling network upgrade in
/// `getblockchaininfo` output.
pub const SAPLING_UPGRADE_ID: &str = "76b809bb";

/// Node error code returned by `getblock` for a height beyond the tip.
pub const NODE_ERR_HEIGHT_OUT_OF_RANGE: i64 = -8;

/// Vendor string reported by `getLightdInfo`.
pub const LIGHTD_VENDOR: &str = "ECC LightWalletD";

/// Version string reported by `getLightdInfo`.
pub const LIGHTD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Pause between ingestion polls once the cache has caught up with the node.
pub const INGEST_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_length_is_prefix_plus_body() {
        assert_eq!(TRANSPARENT_ADDRESS_LEN, 35);
    }

    #[test]
    fn range_timeout_is_bounded() {
        assert!(RANGE_STREAM_TIMEOUT <= Duration::from_secs(60));
        assert!(RANGE_STREAM_TIMEOUT >= Duration::from_secs(10));
    }
}
