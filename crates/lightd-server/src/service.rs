//! Light client operations.
//!
//! [`LightdService`] answers wallet queries from the block cache where it can
//! and forwards everything else to the full node through the retrying client.
//! It holds no state of its own beyond those two handles, so it is cheap to
//! clone into request tasks.
//!
//! Streaming operations hand results over a channel of capacity one. The
//! producer waits while the consumer is busy and stops as soon as the
//! receiver is dropped. The first error ends a stream, and a block range
//! that outlives its deadline ends with [`ServiceError::DeadlineExceeded`]
//! rather than just stopping.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use lightd_client::RetryingRpcClient;
use lightd_core::address;
use lightd_core::compact::CompactBlock;
use lightd_core::constants::{
    LIGHTD_VENDOR, LIGHTD_VERSION, RANGE_STREAM_TIMEOUT, SAPLING_UPGRADE_ID,
};
use lightd_core::error::{CacheError, ServiceError};
use lightd_core::types::{
    BlockId, BlockRange, Hash256, LightdInfo, RawTransaction, SendResponse,
    TransparentAddressBlockFilter, TxFilter,
};

use crate::cache::BlockCache;

/// Stream of transactions from [`LightdService::get_address_txids`].
pub type TxStream = mpsc::Receiver<Result<RawTransaction, ServiceError>>;

/// A stream of service results, read one item at a time.
pub trait ResultStream<T>: Send {
    /// Next item, or `None` once the stream has ended.
    fn next_item(&mut self) -> impl Future<Output = Option<Result<T, ServiceError>>> + Send;
}

impl<T: Send> ResultStream<T> for mpsc::Receiver<Result<T, ServiceError>> {
    fn next_item(&mut self) -> impl Future<Output = Option<Result<T, ServiceError>>> + Send {
        self.recv()
    }
}

/// Compact blocks from [`LightdService::get_block_range`], ascending.
///
/// The deadline is checked on the reading side, so a consumer that falls
/// behind still sees the stream fail instead of ending early.
pub struct BlockStream {
    source: mpsc::Receiver<Result<Bytes, CacheError>>,
    deadline: Instant,
    timeout: Duration,
    range: (u64, u64),
    done: bool,
}

impl BlockStream {
    /// Next block, the error that ended the stream, or `None` after the end.
    pub async fn recv(&mut self) -> Option<Result<CompactBlock, ServiceError>> {
        if self.done {
            return None;
        }
        if Instant::now() >= self.deadline {
            return Some(self.expire());
        }
        match tokio::time::timeout_at(self.deadline, self.source.recv()).await {
            Ok(Some(item)) => {
                let item = item
                    .map_err(ServiceError::from)
                    .and_then(|bytes| decode_cached(&bytes));
                self.done = item.is_err();
                Some(item)
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(_) => Some(self.expire()),
        }
    }

    fn expire(&mut self) -> Result<CompactBlock, ServiceError> {
        self.done = true;
        self.source.close();
        let (start, end) = self.range;
        warn!(start, end, "block range stream timed out");
        Err(ServiceError::DeadlineExceeded(self.timeout.as_secs()))
    }
}

impl ResultStream<CompactBlock> for BlockStream {
    fn next_item(
        &mut self,
    ) -> impl Future<Output = Option<Result<CompactBlock, ServiceError>>> + Send {
        self.recv()
    }
}

const MSG_SPECIFY_BLOCK: &str = "Please specify a height or a hash";
const MSG_BLOCK_BY_HASH: &str = "GetBlock by Hash is not yet implemented";
const MSG_TX_BY_BLOCKHASH: &str =
    "Can't GetTransaction with a blockhash+num. Please call GetTransaction with txid";
const MSG_TX_NEEDS_TXID: &str = "Please call GetTransaction with txid";
const MSG_INVALID_ADDRESS: &str = "Invalid address";

/// Verbose `getrawtransaction` reply.
#[derive(Debug, Deserialize)]
struct VerboseTx {
    hex: String,
    /// Absent or negative while the transaction is in the mempool.
    #[serde(default)]
    height: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct NetworkUpgrade {
    activationheight: u64,
}

#[derive(Debug, Deserialize)]
struct ConsensusInfo {
    nextblock: String,
}

/// The parts of `getblockchaininfo` lightd uses.
#[derive(Debug, Deserialize)]
pub(crate) struct ChainInfo {
    pub chain: String,
    pub headers: u64,
    #[serde(default)]
    upgrades: HashMap<String, NetworkUpgrade>,
    consensus: ConsensusInfo,
}

impl ChainInfo {
    /// Height at which Sapling activates on this chain.
    pub fn sapling_activation_height(&self) -> Result<u64, ServiceError> {
        self.upgrades
            .get(SAPLING_UPGRADE_ID)
            .map(|u| u.activationheight)
            .ok_or_else(|| {
                ServiceError::NodeResponse("getblockchaininfo: no sapling upgrade".into())
            })
    }
}

/// Query the node's chain description.
pub(crate) async fn fetch_chain_info(rpc: &RetryingRpcClient) -> Result<ChainInfo, ServiceError> {
    Ok(rpc.call_json("getblockchaininfo", &[]).await?)
}

/// Cache-backed translation between light clients and the full node.
#[derive(Clone)]
pub struct LightdService {
    cache: Arc<BlockCache>,
    rpc: RetryingRpcClient,
    range_timeout: Duration,
}

impl LightdService {
    pub fn new(cache: Arc<BlockCache>, rpc: RetryingRpcClient) -> Self {
        Self {
            cache,
            rpc,
            range_timeout: RANGE_STREAM_TIMEOUT,
        }
    }

    /// Override the ceiling on a whole block range stream.
    pub fn with_range_timeout(mut self, timeout: Duration) -> Self {
        self.range_timeout = timeout;
        self
    }

    /// Height and hash of the newest cached block.
    pub fn get_latest_block(&self) -> Result<BlockId, ServiceError> {
        let (height, hash) = self.cache.latest().map_err(not_ready)?;
        Ok(BlockId {
            height,
            hash: Some(hash.as_bytes().to_vec()),
        })
    }

    /// Compact block by height. Lookup by hash is not supported.
    pub fn get_block(&self, id: &BlockId) -> Result<CompactBlock, ServiceError> {
        if id.height == 0 && !id.has_hash() {
            return Err(ServiceError::Validation(MSG_SPECIFY_BLOCK.into()));
        }
        if id.has_hash() {
            return Err(ServiceError::Unimplemented(MSG_BLOCK_BY_HASH.into()));
        }
        let bytes = self.cache.get(id.height)?;
        decode_cached(&bytes)
    }

    /// Stream the compact blocks in `range`, both ends inclusive, ascending.
    ///
    /// Blocks already sent stay delivered if a later height is unavailable;
    /// the stream then ends with that error. The whole stream is bounded by
    /// the range timeout, counted from this call.
    pub fn get_block_range(&self, range: &BlockRange) -> Result<BlockStream, ServiceError> {
        let (start, end) = (range.start.height, range.end.height);
        if start > end {
            return Err(ServiceError::Validation(format!(
                "Invalid block range: start {start} is after end {end}"
            )));
        }
        Ok(BlockStream {
            source: self.cache.get_range(start, end),
            deadline: Instant::now() + self.range_timeout,
            timeout: self.range_timeout,
            range: (start, end),
            done: false,
        })
    }

    /// Raw transaction and its mined height.
    ///
    /// A txid in the filter wins. Otherwise a block height with an index
    /// resolves the txid through the cached compact block.
    pub async fn get_transaction(&self, filter: &TxFilter) -> Result<RawTransaction, ServiceError> {
        if let Some(hash) = filter.hash.as_deref().filter(|h| !h.is_empty()) {
            return self.fetch_transaction(&native_to_txid(hash)).await;
        }
        match &filter.block {
            Some(block) if block.has_hash() => {
                Err(ServiceError::Validation(MSG_TX_BY_BLOCKHASH.into()))
            }
            Some(block) if block.height > 0 => {
                let txid = self.txid_at(block.height, filter.index)?;
                self.fetch_transaction(&txid.to_display_hex()).await
            }
            _ => Err(ServiceError::Validation(MSG_TX_NEEDS_TXID.into())),
        }
    }

    /// Stream every transaction touching a transparent address in a height
    /// range, in the order the node lists them.
    pub async fn get_address_txids(
        &self,
        filter: &TransparentAddressBlockFilter,
    ) -> Result<TxStream, ServiceError> {
        if !address::is_valid(&filter.address) {
            return Err(ServiceError::Validation(MSG_INVALID_ADDRESS.into()));
        }
        let query = json!({
            "addresses": [filter.address],
            "start": filter.range.start.height,
            "end": filter.range.end.height,
        });
        let txids: Vec<String> = self.rpc.call_json("getaddresstxids", &[query]).await?;
        debug!(address = %filter.address, count = txids.len(), "address txids");

        let (tx, rx) = mpsc::channel(1);
        let service = self.clone();
        tokio::spawn(async move {
            for txid in txids {
                let item = service.fetch_transaction(&txid).await;
                let failed = item.is_err();
                if tx.send(item).await.is_err() {
                    debug!("address txid consumer went away");
                    return;
                }
                if failed {
                    return;
                }
            }
        });
        Ok(rx)
    }

    /// Submit a raw transaction.
    ///
    /// A node rejection is not an error here: it comes back as the response's
    /// code and message. Only a rejection whose code cannot be read fails.
    pub async fn send_transaction(&self, raw: &[u8]) -> Result<SendResponse, ServiceError> {
        match self
            .rpc
            .call("sendrawtransaction", &[json!(hex::encode(raw))])
            .await
        {
            Ok(reply) => Ok(SendResponse {
                error_code: 0,
                error_message: String::from_utf8_lossy(&reply).into_owned(),
            }),
            Err(e) => {
                let text = e.to_string();
                let (code, message) = text
                    .split_once(':')
                    .ok_or_else(|| ServiceError::SendErrorCode(text.clone()))?;
                let error_code = code
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| ServiceError::SendErrorCode(text.clone()))?;
                debug!(error_code, "node rejected transaction");
                Ok(SendResponse {
                    error_code,
                    error_message: message.trim().to_string(),
                })
            }
        }
    }

    /// Server and chain description.
    pub async fn get_lightd_info(&self) -> Result<LightdInfo, ServiceError> {
        let info = fetch_chain_info(&self.rpc).await?;
        Ok(LightdInfo {
            version: LIGHTD_VERSION.to_string(),
            vendor: LIGHTD_VENDOR.to_string(),
            taddr_support: true,
            sapling_activation_height: info.sapling_activation_height()?,
            consensus_branch_id: info.consensus.nextblock,
            chain_name: info.chain,
            block_height: info.headers,
        })
    }

    /// Look up a transaction by its display-order txid.
    async fn fetch_transaction(&self, txid: &str) -> Result<RawTransaction, ServiceError> {
        let reply: VerboseTx = self
            .rpc
            .call_json("getrawtransaction", &[json!(txid), json!(1)])
            .await?;
        let data = hex::decode(&reply.hex)
            .map_err(|e| ServiceError::NodeResponse(format!("getrawtransaction hex: {e}")))?;
        let height = reply.height.filter(|h| *h > 0).unwrap_or(0) as u64;
        Ok(RawTransaction { data, height })
    }

    /// Txid of the transaction at `index` in the cached block at `height`.
    fn txid_at(&self, height: u64, index: u64) -> Result<Hash256, ServiceError> {
        let block = decode_cached(&self.cache.get(height)?)?;
        block.tx_at(index).map(|tx| tx.hash).ok_or_else(|| {
            ServiceError::Validation(format!("no transaction at index {index} in block {height}"))
        })
    }
}

fn not_ready(err: CacheError) -> ServiceError {
    match err {
        CacheError::Empty => ServiceError::NotReady,
        other => other.into(),
    }
}

fn decode_cached(bytes: &[u8]) -> Result<CompactBlock, ServiceError> {
    CompactBlock::decode(bytes).map_err(|e| CacheError::CorruptState(e).into())
}

/// Txids travel in native byte order from clients; the node wants them
/// byte-reversed.
fn native_to_txid(hash: &[u8]) -> String {
    let reversed: Vec<u8> = hash.iter().rev().copied().collect();
    hex::encode(reversed)
}
