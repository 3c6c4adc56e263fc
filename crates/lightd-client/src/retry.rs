//! Retry policy for node RPC calls.
//!
//! The node occasionally drops a request under load. Every call is attempted
//! at most twice: a failed first attempt is repeated immediately, and if the
//! repeat also fails its error (not the first one) is returned. Successful
//! replies are never repeated, whatever they contain.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use lightd_core::error::TransportError;

use crate::transport::NodeTransport;

/// Stateless wrapper applying the at-most-one-retry policy to a transport.
#[derive(Clone)]
pub struct RetryingRpcClient {
    transport: Arc<dyn NodeTransport>,
}

impl RetryingRpcClient {
    pub fn new(transport: Arc<dyn NodeTransport>) -> Self {
        Self { transport }
    }

    /// Issue `method` with `params`, retrying once on error.
    pub async fn call(&self, method: &str, params: &[Value]) -> Result<Vec<u8>, TransportError> {
        match self.transport.raw_request(method, params).await {
            Ok(bytes) => Ok(bytes),
            Err(first) => {
                warn!(method, error = %first, "node rpc failed, retrying once");
                let second = self.transport.raw_request(method, params).await;
                if let Err(ref e) = second {
                    debug!(method, error = %e, "node rpc retry failed");
                }
                second
            }
        }
    }

    /// [`call`](Self::call), then decode the reply as JSON.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[Value],
    ) -> Result<T, TransportError> {
        let bytes = self.call(method, params).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::MalformedResponse(format!("{method}: {e}")))
    }
}
