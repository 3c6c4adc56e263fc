//! lightd binary.
//!
//! Opens the compact block cache, starts ingesting blocks from the full node
//! in the background and serves light wallet queries over JSON-RPC.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use lightd_client::{HttpTransport, RetryingRpcClient};
use lightd_core::conf::ConnectionDescriptor;
use lightd_core::constants::DEFAULT_NODE_RPC_PORT;
use lightd_server::{
    BlockCache, Ingestor, LightdService, ServerConfig, VerboseBlockParser, start_rpc_server,
};

/// Compact block server for light wallets.
#[derive(Parser, Debug)]
#[command(
    name = "lightd",
    version,
    about = "Caches compact blocks from a full node and serves them to light wallets"
)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the block cache
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// RPC server port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Path to the full node's zcash.conf
    #[arg(long)]
    node_conf: Option<PathBuf>,

    /// Height to start ingesting at when the cache is empty
    #[arg(long)]
    start_height: Option<u64>,

    /// Maximum number of blocks kept in the cache
    #[arg(long)]
    retention_limit: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,
}

impl Args {
    /// Layer command-line flags over the loaded configuration.
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = ServerConfig::load(self.config.as_deref())?;

        if let Some(data_dir) = self.data_dir {
            // The node conf follows the data dir unless it was set elsewhere.
            if config.node_conf == config.data_dir.join("zcash.conf") {
                config.node_conf = data_dir.join("zcash.conf");
            }
            config.data_dir = data_dir;
        }
        if let Some(bind) = self.rpc_bind {
            config.rpc_bind = bind;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if let Some(path) = self.node_conf {
            config.node_conf = path;
        }
        if self.start_height.is_some() {
            config.start_height = self.start_height;
        }
        if let Some(limit) = self.retention_limit {
            anyhow::ensure!(limit > 0, "--retention-limit must be at least 1");
            config.retention_limit = limit;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let config = match Args::parse().into_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("lightd: {e:#}");
            std::process::exit(2);
        }
    };

    init_logging(&config.log_level, &config.log_format);

    if let Err(e) = run(config).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!("lightd v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("node_conf: {:?}", config.node_conf);
    info!("rpc_addr: {}", config.rpc_addr());
    info!("retention_limit: {}", config.retention_limit);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {:?}", config.data_dir))?;

    let conf_text = std::fs::read_to_string(&config.node_conf)
        .with_context(|| format!("reading node conf {:?}", config.node_conf))?;
    let descriptor =
        ConnectionDescriptor::from_conf_with_default_port(&conf_text, Some(DEFAULT_NODE_RPC_PORT))
            .with_context(|| format!("parsing node conf {:?}", config.node_conf))?;
    let transport = HttpTransport::new(&descriptor, config.node_timeout())?;
    info!("full node endpoint: {}", transport.endpoint());
    let rpc = RetryingRpcClient::new(Arc::new(transport));

    let cache = Arc::new(
        BlockCache::open(config.cache_path(), config.retention_limit)
            .with_context(|| format!("opening block cache {:?}", config.cache_path()))?,
    );
    match cache.latest() {
        Ok((height, hash)) => info!("cache tip: height={height} hash={hash}"),
        Err(_) => info!("cache is empty"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingestor = Ingestor::new(Arc::clone(&cache), rpc.clone(), Arc::new(VerboseBlockParser))
        .with_start_height(config.start_height);
    let mut ingest_task = tokio::spawn(ingestor.run(shutdown_rx));

    let service = Arc::new(
        LightdService::new(Arc::clone(&cache), rpc).with_range_timeout(config.range_timeout()),
    );
    let rpc_handle = start_rpc_server(&config.rpc_addr(), service).await?;
    info!("RPC server listening on {}", config.rpc_addr());
    info!("lightd running (Ctrl+C to stop)");

    let mut ingest_done = false;
    tokio::select! {
        joined = &mut ingest_task => {
            ingest_done = true;
            match joined {
                Ok(Ok(())) => info!("block ingestion exited"),
                Ok(Err(e)) => error!("block ingestion failed: {e}"),
                Err(e) => error!("block ingestion task panicked: {e}"),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("received Ctrl+C, shutting down..."),
                Err(e) => warn!("failed to listen for Ctrl+C: {e}"),
            }
        }
    }

    rpc_handle.stop().ok();
    info!("RPC server stopped");

    let _ = shutdown_tx.send(true);
    if !ingest_done {
        if let Ok(Err(e)) = ingest_task.await {
            warn!("block ingestion ended with error: {e}");
        }
    }

    cache.flush()?;
    info!("lightd shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG` takes precedence over `level_str` when set. Pass
/// `format = "json"` for structured JSON output; anything else is text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
