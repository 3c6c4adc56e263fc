//! Background ingestion of blocks from the full node into the cache.
//!
//! The [`Ingestor`] is the cache's only writer. It walks heights upward,
//! fetching each block in verbose form, converting it to a compact block and
//! adding it. When the node does not have the next height yet it sleeps for
//! the poll interval. When a fetched block does not build on the cached
//! block below it, the chain has reorganised and ingestion steps back one
//! height to overwrite the stale entry.
//!
//! No cache lock is held while a node call is in flight.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use lightd_client::RetryingRpcClient;
use lightd_core::compact::BlockParser;
use lightd_core::constants::{INGEST_POLL_INTERVAL, NODE_ERR_HEIGHT_OUT_OF_RANGE};
use lightd_core::error::ServiceError;

use crate::cache::BlockCache;
use crate::service::fetch_chain_info;

/// Outcome of one ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The block was cached; move to the next height.
    Added,
    /// The node has no block at this height yet.
    Waiting,
    /// The block does not extend the cached chain; retry one height lower.
    Rewind,
}

/// Feeds the block cache from the full node.
pub struct Ingestor {
    cache: Arc<BlockCache>,
    rpc: RetryingRpcClient,
    parser: Arc<dyn BlockParser>,
    start_height: Option<u64>,
    poll_interval: Duration,
}

impl Ingestor {
    pub fn new(cache: Arc<BlockCache>, rpc: RetryingRpcClient, parser: Arc<dyn BlockParser>) -> Self {
        Self {
            cache,
            rpc,
            parser,
            start_height: None,
            poll_interval: INGEST_POLL_INTERVAL,
        }
    }

    /// Height to start from when the cache is empty. Defaults to the
    /// chain's Sapling activation height.
    pub fn with_start_height(mut self, height: Option<u64>) -> Self {
        self.start_height = height;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServiceError> {
        let mut height = self.resume_height().await?;
        info!(height, "starting block ingestion");

        while !*shutdown.borrow() {
            match self.step(height).await {
                Ok(Step::Added) => {
                    height += 1;
                    continue;
                }
                Ok(Step::Rewind) => {
                    height -= 1;
                    continue;
                }
                Ok(Step::Waiting) => {}
                Err(e) => warn!(height, error = %e, "block ingestion failed"),
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(height, "block ingestion stopped");
        Ok(())
    }

    /// First height to fetch: just above the cached tip, else the
    /// configured start, else Sapling activation.
    pub async fn resume_height(&self) -> Result<u64, ServiceError> {
        if let Ok(last) = self.cache.latest_height() {
            return Ok(last + 1);
        }
        if let Some(height) = self.start_height {
            return Ok(height);
        }
        fetch_chain_info(&self.rpc).await?.sapling_activation_height()
    }

    /// Fetch, convert and cache the block at `height`.
    pub async fn step(&self, height: u64) -> Result<Step, ServiceError> {
        let raw = match self
            .rpc
            .call("getblock", &[json!(height.to_string()), json!(2)])
            .await
        {
            Ok(raw) => raw,
            Err(e) if e.node_code() == Some(NODE_ERR_HEIGHT_OUT_OF_RANGE) => {
                debug!(height, "waiting for next block");
                return Ok(Step::Waiting);
            }
            Err(e) => return Err(e.into()),
        };

        let block = self
            .parser
            .parse_block(&raw)
            .map_err(|e| ServiceError::NodeResponse(format!("getblock {height}: {e}")))?;
        if block.height != height {
            return Err(ServiceError::NodeResponse(format!(
                "getblock {height} returned height {}",
                block.height
            )));
        }

        let cached_parent = height.checked_sub(1).and_then(|h| self.cache.hash_at(h));
        if let Some(cached) = cached_parent {
            if cached != block.prev_hash {
                warn!(height, cached = %cached, prev = %block.prev_hash, "reorg detected");
                return Ok(Step::Rewind);
            }
        }

        let bytes = block
            .encode()
            .map_err(|e| ServiceError::NodeResponse(e.to_string()))?;
        self.cache.add(height, &bytes)?;
        debug!(height, hash = %block.hash, txs = block.vtx.len(), "cached block");
        Ok(Step::Added)
    }
}
