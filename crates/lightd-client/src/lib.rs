//! # lightd-client: talking to the full node.
//!
//! - [`transport::NodeTransport`]: one raw RPC round trip
//! - [`transport::HttpTransport`]: JSON-RPC over HTTP with basic auth
//! - [`retry::RetryingRpcClient`]: at-most-one-retry policy over any transport
//! - `testing::ScriptedTransport`: deterministic transport for tests
//!   (feature `testing`)

pub mod retry;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use retry::RetryingRpcClient;
pub use transport::{HttpTransport, NodeTransport};
