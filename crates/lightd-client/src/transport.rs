//! Raw RPC transport to the full node.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use lightd_core::conf::ConnectionDescriptor;
use lightd_core::error::TransportError;

/// A single RPC round trip to the full node.
///
/// Returns the JSON `result` member as raw bytes. An empty byte result is a
/// legitimate reply and is distinct from an error.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn raw_request(&self, method: &str, params: &[Value]) -> Result<Vec<u8>, TransportError>;
}

/// Error object in a node reply.
#[derive(Debug, Deserialize)]
struct NodeErrorBody {
    code: i64,
    message: String,
}

/// Reply envelope. The node speaks JSON-RPC 1.0: both members are present,
/// one of them null.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<NodeErrorBody>,
}

/// JSON-RPC over HTTP POST with basic auth.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    user: String,
    pass: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Build a transport for the node described by `desc`.
    pub fn new(desc: &ConnectionDescriptor, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: desc.url(),
            user: desc.user.clone(),
            pass: desc.pass.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn raw_request(&self, method: &str, params: &[Value]) -> Result<Vec<u8>, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        // The node answers errors with a non-2xx status and a JSON body, so
        // the body is consulted before the status.
        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(env) => env,
            Err(_) if !status.is_success() => {
                return Err(TransportError::Http(format!("{method}: HTTP {status}")));
            }
            Err(e) => return Err(TransportError::MalformedResponse(e.to_string())),
        };

        if let Some(err) = envelope.error {
            return Err(TransportError::Node {
                code: err.code,
                message: err.message,
            });
        }

        serde_json::to_vec(&envelope.result)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: "127.0.0.1:18232".into(),
            user: "u".into(),
            pass: "p".into(),
            use_tls: false,
        }
    }

    #[test]
    fn endpoint_comes_from_descriptor() {
        let transport = HttpTransport::new(&descriptor(), Duration::from_secs(5)).unwrap();
        assert_eq!(transport.endpoint(), "http://127.0.0.1:18232/");
    }

    #[test]
    fn envelope_with_error_parses() {
        let env: Envelope = serde_json::from_str(
            r#"{"result":null,"error":{"code":-8,"message":"Block height out of range"},"id":1}"#,
        )
        .unwrap();
        let err = env.error.unwrap();
        assert_eq!(err.code, -8);
        assert_eq!(err.message, "Block height out of range");
    }

    #[test]
    fn envelope_with_result_parses() {
        let env: Envelope =
            serde_json::from_str(r#"{"result":{"hex":"00","height":5},"error":null,"id":1}"#)
                .unwrap();
        assert!(env.error.is_none());
        assert_eq!(env.result["height"], 5);
    }

    #[tokio::test]
    async fn unreachable_node_is_an_http_error() {
        let desc = ConnectionDescriptor {
            host: "127.0.0.1:1".into(),
            ..descriptor()
        };
        let transport = HttpTransport::new(&desc, Duration::from_secs(2)).unwrap();
        let err = transport.raw_request("getinfo", &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }
}
