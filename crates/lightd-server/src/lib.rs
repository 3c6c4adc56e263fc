//! # lightd-server: compact block cache and light client service.
//!
//! Sits between light wallets and a full node:
//! - [`cache::BlockCache`]: RocksDB-backed window of recent compact blocks
//! - [`ingest::Ingestor`]: background task feeding the cache from the node
//! - [`parser::VerboseBlockParser`]: turns verbose node blocks into compact blocks
//! - [`service::LightdService`]: the light client operations
//! - [`rpc`]: JSON-RPC server exposing the service
//! - [`config::ServerConfig`]: server configuration

pub mod cache;
pub mod config;
pub mod ingest;
pub mod parser;
pub mod rpc;
pub mod service;

pub use cache::BlockCache;
pub use config::ServerConfig;
pub use ingest::Ingestor;
pub use parser::VerboseBlockParser;
pub use rpc::start_rpc_server;
pub use service::LightdService;
