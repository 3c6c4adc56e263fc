//! Light client operations against a real block cache and a scripted node.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use lightd_client::RetryingRpcClient;
use lightd_client::testing::ScriptedTransport;
use lightd_core::compact::{CompactBlock, CompactTx};
use lightd_core::constants::{COMPACT_BLOCK_PROTO_VERSION, LIGHTD_VENDOR};
use lightd_core::error::{CacheError, ServiceError, TransportError};
use lightd_core::types::{
    BlockId, BlockRange, Hash256, RawTransaction, SendResponse, TransparentAddressBlockFilter,
    TxFilter,
};
use lightd_server::cache::BlockCache;
use lightd_server::service::LightdService;

const VALID_ADDRESS: &str = "t1234567890123456789012345678901234";

struct Harness {
    service: LightdService,
    cache: Arc<BlockCache>,
    script: Arc<ScriptedTransport>,
    _dir: tempfile::TempDir,
}

fn harness(retention: u64) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(BlockCache::open(dir.path(), retention).unwrap());
    let script = Arc::new(ScriptedTransport::new());
    let service = LightdService::new(Arc::clone(&cache), RetryingRpcClient::new(script.clone()));
    Harness {
        service,
        cache,
        script,
        _dir: dir,
    }
}

fn tx_hash(height: u64, index: u64) -> Hash256 {
    let mut bytes = [0x33; 32];
    bytes[0] = height as u8;
    bytes[1] = index as u8;
    Hash256(bytes)
}

fn block(height: u64) -> CompactBlock {
    let mut hash = [0x10; 32];
    hash[..8].copy_from_slice(&height.to_le_bytes());
    CompactBlock {
        proto_version: COMPACT_BLOCK_PROTO_VERSION,
        height,
        hash: Hash256(hash),
        prev_hash: Hash256::ZERO,
        time: 1_600_000_000,
        header: Vec::new(),
        vtx: (0..2)
            .map(|index| CompactTx {
                index,
                hash: tx_hash(height, index),
                fee: 0,
                spends: Vec::new(),
                outputs: Vec::new(),
            })
            .collect(),
    }
}

fn fill(cache: &BlockCache, heights: std::ops::RangeInclusive<u64>) {
    for h in heights {
        cache.add(h, &block(h).encode().unwrap()).unwrap();
    }
}

fn raw_tx_reply(hex: &str, height: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({ "hex": hex, "height": height })).unwrap()
}

fn node_err(code: i64, message: &str) -> TransportError {
    TransportError::Node {
        code,
        message: message.into(),
    }
}

// ------------------------------------------------------------------
// GetLatestBlock
// ------------------------------------------------------------------

#[test]
fn latest_block_warms_up_then_reports_height() {
    let h = harness(10);
    let err = h.service.get_latest_block().unwrap_err();
    assert_eq!(err.to_string(), "Cache is empty. Server is probably not yet ready");

    fill(&h.cache, 380_640..=380_642);
    let latest = h.service.get_latest_block().unwrap();
    assert_eq!(latest.height, 380_642);
    assert_eq!(latest.hash, Some(block(380_642).hash.as_bytes().to_vec()));
}

// ------------------------------------------------------------------
// GetBlock
// ------------------------------------------------------------------

#[test]
fn get_block_needs_height_or_hash() {
    let h = harness(10);
    let err = h.service.get_block(&BlockId::default()).unwrap_err();
    assert_eq!(err, ServiceError::Validation("Please specify a height or a hash".into()));
}

#[test]
fn get_block_by_hash_is_unimplemented() {
    let h = harness(10);
    fill(&h.cache, 1..=2);
    let id = BlockId::with_hash(block(1).hash.as_bytes().to_vec());
    let err = h.service.get_block(&id).unwrap_err();
    assert_eq!(
        err,
        ServiceError::Unimplemented("GetBlock by Hash is not yet implemented".into())
    );
}

#[test]
fn get_block_by_height_reads_cache() {
    let h = harness(10);
    fill(&h.cache, 5..=7);
    assert_eq!(h.service.get_block(&BlockId::at_height(6)).unwrap(), block(6));
    assert_eq!(
        h.service.get_block(&BlockId::at_height(8)).unwrap_err(),
        ServiceError::Cache(CacheError::NotFound(8))
    );
}

// ------------------------------------------------------------------
// GetBlockRange
// ------------------------------------------------------------------

#[tokio::test]
async fn range_of_one_streams_one_block() {
    let h = harness(10);
    fill(&h.cache, 1..=5);
    let mut stream = h.service.get_block_range(&BlockRange::new(3, 3)).unwrap();
    assert_eq!(stream.recv().await.unwrap().unwrap(), block(3));
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn range_failure_mid_stream_keeps_prefix() {
    let h = harness(10);
    fill(&h.cache, 1..=4);
    let mut stream = h.service.get_block_range(&BlockRange::new(2, 8)).unwrap();

    let mut delivered = Vec::new();
    let mut failure = None;
    while let Some(item) = stream.recv().await {
        match item {
            Ok(b) => delivered.push(b.height),
            Err(e) => failure = Some(e),
        }
    }
    assert_eq!(delivered, vec![2, 3, 4]);
    assert_eq!(failure, Some(ServiceError::Cache(CacheError::NotFound(5))));
}

#[test]
fn inverted_range_is_rejected() {
    let h = harness(10);
    fill(&h.cache, 1..=4);
    assert!(matches!(
        h.service.get_block_range(&BlockRange::new(4, 2)),
        Err(ServiceError::Validation(_))
    ));
}

#[tokio::test]
async fn stalled_consumer_sees_deadline_error() {
    let h = harness(10);
    fill(&h.cache, 1..=5);
    let service = h.service.clone().with_range_timeout(Duration::from_millis(50));
    let mut stream = service.get_block_range(&BlockRange::new(1, 5)).unwrap();

    assert_eq!(stream.recv().await.unwrap().unwrap().height, 1);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // A partial range never ends cleanly: the deadline is reported.
    let mut rest = Vec::new();
    while let Some(item) = stream.recv().await {
        rest.push(item);
    }
    assert_eq!(rest, vec![Err(ServiceError::DeadlineExceeded(0))]);
}

#[tokio::test]
async fn fast_consumer_finishes_before_deadline() {
    let h = harness(10);
    fill(&h.cache, 1..=5);
    let service = h.service.clone().with_range_timeout(Duration::from_secs(5));
    let mut stream = service.get_block_range(&BlockRange::new(1, 5)).unwrap();

    let mut heights = Vec::new();
    while let Some(item) = stream.recv().await {
        heights.push(item.unwrap().height);
    }
    assert_eq!(heights, vec![1, 2, 3, 4, 5]);
}

// ------------------------------------------------------------------
// GetTransaction
// ------------------------------------------------------------------

#[tokio::test]
async fn get_transaction_without_reference_fails() {
    let h = harness(10);
    let err = h.service.get_transaction(&TxFilter::default()).await.unwrap_err();
    assert_eq!(err.to_string(), "Please call GetTransaction with txid");
    assert_eq!(h.script.call_count(), 0);
}

#[tokio::test]
async fn get_transaction_by_blockhash_is_rejected() {
    let h = harness(10);
    let filter = TxFilter::by_block(BlockId::with_hash(vec![1; 32]), 0);
    let err = h.service.get_transaction(&filter).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Can't GetTransaction with a blockhash+num. Please call GetTransaction with txid"
    );
    assert_eq!(h.script.call_count(), 0);
}

#[tokio::test]
async fn get_transaction_by_hash_returns_node_reply() {
    let h = harness(10);
    h.script.push_ok("getrawtransaction", raw_tx_reply("0a0b0c", 1234));

    let mut native = [0u8; 32];
    native[0] = 0xaa;
    native[31] = 0xbb;
    let tx = h
        .service
        .get_transaction(&TxFilter::by_hash(native.to_vec()))
        .await
        .unwrap();
    assert_eq!(
        tx,
        RawTransaction {
            data: vec![0x0a, 0x0b, 0x0c],
            height: 1234
        }
    );

    let call = &h.script.calls()[0];
    let txid = call.params[0].as_str().unwrap();
    assert!(txid.starts_with("bb") && txid.ends_with("aa"));
    assert_eq!(call.params[1], json!(1));
}

#[tokio::test]
async fn get_transaction_hash_wins_over_block() {
    let h = harness(10);
    h.script.push_ok("getrawtransaction", raw_tx_reply("ff", 9));
    let filter = TxFilter {
        block: Some(BlockId::with_hash(vec![1; 32])),
        index: 3,
        hash: Some(vec![7; 32]),
    };
    assert_eq!(h.service.get_transaction(&filter).await.unwrap().height, 9);
}

#[tokio::test]
async fn empty_block_hash_falls_back_to_height() {
    let h = harness(10);
    fill(&h.cache, 100..=101);
    h.script.push_ok("getrawtransaction", raw_tx_reply("02", 100));

    let filter = TxFilter::by_block(
        BlockId {
            height: 100,
            hash: Some(Vec::new()),
        },
        0,
    );
    assert_eq!(h.service.get_transaction(&filter).await.unwrap().height, 100);
    assert_eq!(
        h.script.calls()[0].params[0],
        json!(tx_hash(100, 0).to_display_hex())
    );
}

#[tokio::test]
async fn get_transaction_by_height_and_index_uses_cache() {
    let h = harness(10);
    fill(&h.cache, 100..=101);
    h.script.push_ok("getrawtransaction", raw_tx_reply("01", 101));

    let filter = TxFilter::by_block(BlockId::at_height(101), 1);
    let tx = h.service.get_transaction(&filter).await.unwrap();
    assert_eq!(tx.height, 101);
    assert_eq!(
        h.script.calls()[0].params[0],
        json!(tx_hash(101, 1).to_display_hex())
    );
}

#[tokio::test]
async fn get_transaction_rpc_error_propagates() {
    let h = harness(10);
    let missing = node_err(-5, "No information available about transaction");
    h.script.push_err("getrawtransaction", missing.clone());
    h.script.push_err("getrawtransaction", missing.clone());

    let err = h
        .service
        .get_transaction(&TxFilter::by_hash(vec![1; 32]))
        .await
        .unwrap_err();
    assert_eq!(err, ServiceError::Transport(missing));
    assert_eq!(h.script.call_count(), 2);
}

// ------------------------------------------------------------------
// GetAddressTxids
// ------------------------------------------------------------------

fn address_filter(address: &str) -> TransparentAddressBlockFilter {
    TransparentAddressBlockFilter {
        address: address.to_string(),
        range: BlockRange::new(20, 30),
    }
}

#[tokio::test]
async fn invalid_address_makes_no_rpc_call() {
    let h = harness(10);
    for bad in ["", "t12345678901234567890123456789012345", "u1234567890123456789012345678901234"] {
        let err = h.service.get_address_txids(&address_filter(bad)).await.unwrap_err();
        assert_eq!(err, ServiceError::Validation("Invalid address".into()));
    }
    assert_eq!(h.script.call_count(), 0);
}

#[tokio::test]
async fn address_txids_stream_in_node_order() {
    let h = harness(10);
    h.script.push_ok("getaddresstxids", br#"["cc","aa","bb"]"#.to_vec());
    h.script.push_ok("getrawtransaction", raw_tx_reply("0c", 25));
    h.script.push_ok("getrawtransaction", raw_tx_reply("0a", 21));
    h.script.push_ok("getrawtransaction", raw_tx_reply("0b", 30));

    let mut stream = h
        .service
        .get_address_txids(&address_filter(VALID_ADDRESS))
        .await
        .unwrap();
    let mut heights = Vec::new();
    while let Some(item) = stream.recv().await {
        heights.push(item.unwrap().height);
    }
    assert_eq!(heights, vec![25, 21, 30]);

    let calls = h.script.calls();
    assert_eq!(
        calls[0].params,
        vec![json!({ "addresses": [VALID_ADDRESS], "start": 20, "end": 30 })]
    );
    let looked_up: Vec<_> = calls[1..].iter().map(|c| c.params[0].clone()).collect();
    assert_eq!(looked_up, vec![json!("cc"), json!("aa"), json!("bb")]);
}

#[tokio::test]
async fn address_txids_stop_on_first_failed_lookup() {
    let h = harness(10);
    h.script.push_ok("getaddresstxids", br#"["aa","bb","cc"]"#.to_vec());
    h.script.push_ok("getrawtransaction", raw_tx_reply("0a", 21));
    h.script.push_err("getrawtransaction", node_err(-5, "gone"));
    h.script.push_err("getrawtransaction", node_err(-5, "gone"));
    h.script.push_ok("getrawtransaction", raw_tx_reply("0c", 22));

    let mut stream = h
        .service
        .get_address_txids(&address_filter(VALID_ADDRESS))
        .await
        .unwrap();
    assert!(stream.recv().await.unwrap().is_ok());
    assert!(matches!(
        stream.recv().await.unwrap(),
        Err(ServiceError::Transport(TransportError::Node { code: -5, .. }))
    ));
    assert!(stream.recv().await.is_none());
    // "cc" is never looked up, so its reply stays queued.
    assert_eq!(h.script.call_count(), 4);
    assert_eq!(h.script.pending(), 1);
}

// ------------------------------------------------------------------
// SendTransaction
// ------------------------------------------------------------------

#[tokio::test]
async fn send_transaction_success() {
    let h = harness(10);
    h.script.push_ok("sendrawtransaction", b"sendtxresult".to_vec());
    let resp = h.service.send_transaction(&[0xde, 0xad]).await.unwrap();
    assert_eq!(
        resp,
        SendResponse {
            error_code: 0,
            error_message: "sendtxresult".into()
        }
    );
    assert_eq!(h.script.calls()[0].params, vec![json!("dead")]);
}

#[tokio::test]
async fn send_transaction_node_rejection_is_structured() {
    let h = harness(10);
    h.script.push_err("sendrawtransaction", node_err(-17, "first"));
    h.script.push_err("sendrawtransaction", node_err(-17, "some error"));
    let resp = h.service.send_transaction(&[1]).await.unwrap();
    assert_eq!(
        resp,
        SendResponse {
            error_code: -17,
            error_message: "some error".into()
        }
    );
}

#[tokio::test]
async fn send_transaction_unparseable_code_fails() {
    let h = harness(10);
    h.script.push_err("sendrawtransaction", TransportError::Http("refused".into()));
    h.script.push_err("sendrawtransaction", TransportError::Http("refused".into()));
    let err = h.service.send_transaction(&[1]).await.unwrap_err();
    assert!(matches!(err, ServiceError::SendErrorCode(_)));
}

#[tokio::test]
async fn send_transaction_without_separator_fails() {
    let h = harness(10);
    h.script.push_err("sendrawtransaction", TransportError::MalformedResponse("eof".into()));
    h.script.push_err("sendrawtransaction", TransportError::MalformedResponse("eof".into()));
    // "malformed node response: eof" has a separator but no numeric code.
    assert!(matches!(
        h.service.send_transaction(&[1]).await,
        Err(ServiceError::SendErrorCode(_))
    ));
}

// ------------------------------------------------------------------
// GetLightdInfo
// ------------------------------------------------------------------

#[tokio::test]
async fn lightd_info_from_chain_info() {
    let h = harness(10);
    h.script.push_ok(
        "getblockchaininfo",
        serde_json::to_vec(&json!({
            "chain": "test",
            "blocks": 1_000_000,
            "headers": 1_000_010,
            "upgrades": { "76b809bb": { "name": "Sapling", "activationheight": 280_000 } },
            "consensus": { "chaintip": "2bb40e60", "nextblock": "2bb40e60" }
        }))
        .unwrap(),
    );
    let info = h.service.get_lightd_info().await.unwrap();
    assert_eq!(info.vendor, LIGHTD_VENDOR);
    assert!(info.taddr_support);
    assert_eq!(info.chain_name, "test");
    assert_eq!(info.sapling_activation_height, 280_000);
    assert_eq!(info.consensus_branch_id, "2bb40e60");
    assert_eq!(info.block_height, 1_000_010);
}

#[tokio::test]
async fn lightd_info_fails_when_node_fails() {
    let h = harness(10);
    h.script.push_err("getblockchaininfo", TransportError::Http("down".into()));
    h.script.push_err("getblockchaininfo", TransportError::Http("down".into()));
    assert!(matches!(
        h.service.get_lightd_info().await,
        Err(ServiceError::Transport(_))
    ));
}
