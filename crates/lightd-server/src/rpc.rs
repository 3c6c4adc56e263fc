//! JSON-RPC server for lightd.
//!
//! Uses jsonrpsee 0.24 to expose the light client operations of
//! [`LightdService`]. Request/response operations are plain methods; the two
//! streaming operations are subscriptions that deliver one notification per
//! item and close with an error if the stream fails part way.
//!
//! Heights are integers. Hashes and byte payloads are hex strings, hashes in
//! native byte order.

use std::sync::Arc;

use jsonrpsee::core::{SubscriptionResult, async_trait};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::{PendingSubscriptionSink, RpcModule, SubscriptionMessage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lightd_core::compact::{CompactBlock, CompactOutput, CompactTx};
use lightd_core::error::{CacheError, LightdError, ServiceError, TransportError};
use lightd_core::types::{
    BlockId, BlockRange, LightdInfo, RawTransaction, SendResponse,
    TransparentAddressBlockFilter, TxFilter,
};

use crate::service::{LightdService, ResultStream};

/// JSON-RPC error codes used by lightd.
pub mod codes {
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Resource not found
    pub const RESOURCE_NOT_FOUND: i32 = -32001;
    /// Resource unavailable (cache still warming up)
    pub const RESOURCE_UNAVAILABLE: i32 = -32002;
    /// Method not supported
    pub const METHOD_NOT_SUPPORTED: i32 = -32004;
    /// Stream deadline exceeded
    pub const DEADLINE_EXCEEDED: i32 = -32005;
}

/// JSON representation of a block reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockIdJson {
    #[serde(default)]
    pub height: u64,
    /// Block hash as hex, native byte order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// JSON representation of a transaction filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxFilterJson {
    #[serde(default)]
    pub block: Option<BlockIdJson>,
    #[serde(default)]
    pub index: u64,
    /// Transaction hash as hex, native byte order.
    #[serde(default)]
    pub hash: Option<String>,
}

/// JSON representation of a compact output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactOutputJson {
    pub cmu: String,
    pub epk: String,
    pub ciphertext: String,
}

/// JSON representation of a compact transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactTxJson {
    pub index: u64,
    pub hash: String,
    pub fee: u32,
    /// Nullifiers as hex.
    pub spends: Vec<String>,
    pub outputs: Vec<CompactOutputJson>,
}

/// JSON representation of a compact block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactBlockJson {
    pub proto_version: u32,
    pub height: u64,
    pub hash: String,
    pub prev_hash: String,
    /// Block timestamp (Unix seconds).
    pub time: u32,
    pub header: String,
    pub vtx: Vec<CompactTxJson>,
}

/// JSON representation of a raw transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransactionJson {
    /// Serialized transaction as hex.
    pub data: String,
    /// Mined height, zero if unmined.
    pub height: u64,
}

/// JSON representation of a send result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResponseJson {
    pub error_code: i32,
    pub error_message: String,
}

/// JSON representation of server info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightdInfoJson {
    pub version: String,
    pub vendor: String,
    pub taddr_support: bool,
    pub chain_name: String,
    pub sapling_activation_height: u64,
    pub consensus_branch_id: String,
    pub block_height: u64,
}

impl From<&CompactOutput> for CompactOutputJson {
    fn from(out: &CompactOutput) -> Self {
        Self {
            cmu: hex::encode(out.cmu),
            epk: hex::encode(out.epk),
            ciphertext: hex::encode(&out.ciphertext),
        }
    }
}

impl From<&CompactTx> for CompactTxJson {
    fn from(tx: &CompactTx) -> Self {
        Self {
            index: tx.index,
            hash: hex::encode(tx.hash.as_bytes()),
            fee: tx.fee,
            spends: tx.spends.iter().map(|s| hex::encode(s.nf)).collect(),
            outputs: tx.outputs.iter().map(CompactOutputJson::from).collect(),
        }
    }
}

impl From<&CompactBlock> for CompactBlockJson {
    fn from(block: &CompactBlock) -> Self {
        Self {
            proto_version: block.proto_version,
            height: block.height,
            hash: hex::encode(block.hash.as_bytes()),
            prev_hash: hex::encode(block.prev_hash.as_bytes()),
            time: block.time,
            header: hex::encode(&block.header),
            vtx: block.vtx.iter().map(CompactTxJson::from).collect(),
        }
    }
}

impl From<RawTransaction> for RawTransactionJson {
    fn from(tx: RawTransaction) -> Self {
        Self {
            data: hex::encode(tx.data),
            height: tx.height,
        }
    }
}

impl From<SendResponse> for SendResponseJson {
    fn from(resp: SendResponse) -> Self {
        Self {
            error_code: resp.error_code,
            error_message: resp.error_message,
        }
    }
}

impl From<LightdInfo> for LightdInfoJson {
    fn from(info: LightdInfo) -> Self {
        Self {
            version: info.version,
            vendor: info.vendor,
            taddr_support: info.taddr_support,
            chain_name: info.chain_name,
            sapling_activation_height: info.sapling_activation_height,
            consensus_branch_id: info.consensus_branch_id,
            block_height: info.block_height,
        }
    }
}

/// Create a JSON-RPC error.
fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

/// Map a service failure onto a JSON-RPC error, keeping its message.
pub fn service_error(err: &ServiceError) -> ErrorObjectOwned {
    let code = match err {
        ServiceError::Validation(_) => codes::INVALID_PARAMS,
        ServiceError::NotReady | ServiceError::Cache(CacheError::Empty) => {
            codes::RESOURCE_UNAVAILABLE
        }
        ServiceError::Unimplemented(_) => codes::METHOD_NOT_SUPPORTED,
        ServiceError::Cache(CacheError::NotFound(_) | CacheError::HashNotFound(_)) => {
            codes::RESOURCE_NOT_FOUND
        }
        ServiceError::DeadlineExceeded(_) => codes::DEADLINE_EXCEEDED,
        ServiceError::Transport(TransportError::Node { code, .. }) => {
            i32::try_from(*code).unwrap_or(codes::INTERNAL_ERROR)
        }
        _ => codes::INTERNAL_ERROR,
    };
    rpc_error(code, &err.to_string())
}

/// Decode an optional hex parameter.
fn decode_hex_param(field: &str, value: Option<&str>) -> Result<Option<Vec<u8>>, ErrorObjectOwned> {
    value
        .map(|s| {
            hex::decode(s)
                .map_err(|_| rpc_error(codes::INVALID_PARAMS, &format!("invalid hex in {field}")))
        })
        .transpose()
}

fn block_id_from_json(json: &BlockIdJson) -> Result<BlockId, ErrorObjectOwned> {
    Ok(BlockId {
        height: json.height,
        hash: decode_hex_param("block hash", json.hash.as_deref())?,
    })
}

/// The lightd JSON-RPC interface.
#[rpc(server)]
pub trait LightdRpc {
    /// Returns the height and hash of the newest cached block.
    #[method(name = "getLatestBlock")]
    async fn get_latest_block(&self) -> Result<BlockIdJson, ErrorObjectOwned>;

    /// Returns the compact block at the given height.
    #[method(name = "getBlock")]
    async fn get_block(&self, id: BlockIdJson) -> Result<CompactBlockJson, ErrorObjectOwned>;

    /// Returns a raw transaction by txid, or by block height and index.
    #[method(name = "getTransaction")]
    async fn get_transaction(
        &self,
        filter: TxFilterJson,
    ) -> Result<RawTransactionJson, ErrorObjectOwned>;

    /// Submits a hex-encoded raw transaction to the node.
    #[method(name = "sendTransaction")]
    async fn send_transaction(&self, data: String) -> Result<SendResponseJson, ErrorObjectOwned>;

    /// Returns server and chain info.
    #[method(name = "getLightdInfo")]
    async fn get_lightd_info(&self) -> Result<LightdInfoJson, ErrorObjectOwned>;

    /// Streams compact blocks for an inclusive height range.
    #[subscription(
        name = "subscribeBlockRange" => "blockRange",
        unsubscribe = "unsubscribeBlockRange",
        item = CompactBlockJson
    )]
    async fn subscribe_block_range(&self, start: u64, end: u64) -> SubscriptionResult;

    /// Streams transactions touching a transparent address.
    #[subscription(
        name = "subscribeAddressTxids" => "addressTxid",
        unsubscribe = "unsubscribeAddressTxids",
        item = RawTransactionJson
    )]
    async fn subscribe_address_txids(
        &self,
        address: String,
        start: u64,
        end: u64,
    ) -> SubscriptionResult;
}

/// Implementation of the lightd JSON-RPC server.
pub struct RpcServerImpl {
    service: Arc<LightdService>,
}

impl RpcServerImpl {
    /// Create a new RPC server implementation wrapping the given service.
    pub fn new(service: Arc<LightdService>) -> Self {
        Self { service }
    }
}

/// Forward a service stream to a subscriber until it ends or fails. A
/// subscriber that goes away stops the forwarding.
async fn pipe_stream<T, J>(
    pending: PendingSubscriptionSink,
    mut stream: impl ResultStream<T>,
    to_json: impl Fn(T) -> J,
) -> SubscriptionResult
where
    J: Serialize,
{
    let sink = pending.accept().await?;
    loop {
        tokio::select! {
            _ = sink.closed() => {
                debug!("subscription closed by client");
                break;
            }
            item = stream.next_item() => {
                let Some(item) = item else {
                    break;
                };
                let msg = SubscriptionMessage::from_json(&to_json(item?))?;
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl LightdRpcServer for RpcServerImpl {
    async fn get_latest_block(&self) -> Result<BlockIdJson, ErrorObjectOwned> {
        let id = self
            .service
            .get_latest_block()
            .map_err(|e| service_error(&e))?;
        Ok(BlockIdJson {
            height: id.height,
            hash: id.hash.map(hex::encode),
        })
    }

    async fn get_block(&self, id: BlockIdJson) -> Result<CompactBlockJson, ErrorObjectOwned> {
        let id = block_id_from_json(&id)?;
        let block = self
            .service
            .get_block(&id)
            .map_err(|e| service_error(&e))?;
        Ok(CompactBlockJson::from(&block))
    }

    async fn get_transaction(
        &self,
        filter: TxFilterJson,
    ) -> Result<RawTransactionJson, ErrorObjectOwned> {
        let filter = TxFilter {
            block: filter.block.as_ref().map(block_id_from_json).transpose()?,
            index: filter.index,
            hash: decode_hex_param("hash", filter.hash.as_deref())?,
        };
        let tx = self
            .service
            .get_transaction(&filter)
            .await
            .map_err(|e| service_error(&e))?;
        Ok(tx.into())
    }

    async fn send_transaction(&self, data: String) -> Result<SendResponseJson, ErrorObjectOwned> {
        let raw = hex::decode(&data)
            .map_err(|_| rpc_error(codes::INVALID_PARAMS, "invalid hex encoding"))?;
        let resp = self
            .service
            .send_transaction(&raw)
            .await
            .map_err(|e| service_error(&e))?;
        Ok(resp.into())
    }

    async fn get_lightd_info(&self) -> Result<LightdInfoJson, ErrorObjectOwned> {
        let info = self
            .service
            .get_lightd_info()
            .await
            .map_err(|e| service_error(&e))?;
        Ok(info.into())
    }

    async fn subscribe_block_range(
        &self,
        pending: PendingSubscriptionSink,
        start: u64,
        end: u64,
    ) -> SubscriptionResult {
        let stream = match self.service.get_block_range(&BlockRange::new(start, end)) {
            Ok(stream) => stream,
            Err(e) => {
                pending.reject(service_error(&e)).await;
                return Ok(());
            }
        };
        pipe_stream(pending, stream, |block| CompactBlockJson::from(&block)).await
    }

    async fn subscribe_address_txids(
        &self,
        pending: PendingSubscriptionSink,
        address: String,
        start: u64,
        end: u64,
    ) -> SubscriptionResult {
        let filter = TransparentAddressBlockFilter {
            address,
            range: BlockRange::new(start, end),
        };
        let stream = match self.service.get_address_txids(&filter).await {
            Ok(stream) => stream,
            Err(e) => {
                pending.reject(service_error(&e)).await;
                return Ok(());
            }
        };
        pipe_stream(pending, stream, RawTransactionJson::from).await
    }
}

/// Build the RPC module without binding a socket.
pub fn rpc_module(service: Arc<LightdService>) -> RpcModule<RpcServerImpl> {
    RpcServerImpl::new(service).into_rpc()
}

/// Start the JSON-RPC server on the given address.
///
/// Returns a [`ServerHandle`] that can be used to stop the server.
pub async fn start_rpc_server(
    addr: &str,
    service: Arc<LightdService>,
) -> Result<ServerHandle, LightdError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| LightdError::Server(format!("RPC server error: {e}")))?;

    let handle = server.start(rpc_module(service));

    Ok(handle)
}
