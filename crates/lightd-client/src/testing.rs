//! Scripted in-memory transport.
//!
//! Each test owns its own [`ScriptedTransport`]: replies are queued in call
//! order and every request is recorded, so tests assert on exactly what was
//! sent without any process-wide state.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use lightd_core::error::TransportError;

use crate::transport::NodeTransport;

/// A request observed by [`ScriptedTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Vec<Value>,
}

struct Reply {
    method: String,
    result: Result<Vec<u8>, TransportError>,
}

/// Transport that answers from a queue of scripted replies.
///
/// A call whose method does not match the next queued reply, or a call with
/// nothing queued, fails with a [`TransportError::Http`] describing the
/// mismatch.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply for `method`.
    pub fn push_ok(&self, method: &str, result: impl Into<Vec<u8>>) -> &Self {
        self.replies.lock().push_back(Reply {
            method: method.to_string(),
            result: Ok(result.into()),
        });
        self
    }

    /// Queue a failing reply for `method`.
    pub fn push_err(&self, method: &str, err: TransportError) -> &Self {
        self.replies.lock().push_back(Reply {
            method: method.to_string(),
            result: Err(err),
        });
        self
    }

    /// All requests received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Replies queued but not yet consumed.
    pub fn pending(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl NodeTransport for ScriptedTransport {
    async fn raw_request(&self, method: &str, params: &[Value]) -> Result<Vec<u8>, TransportError> {
        self.calls.lock().push(RecordedCall {
            method: method.to_string(),
            params: params.to_vec(),
        });
        let Some(reply) = self.replies.lock().pop_front() else {
            return Err(TransportError::Http(format!("no scripted reply for {method}")));
        };
        if reply.method != method {
            return Err(TransportError::Http(format!(
                "expected call to {}, got {method}",
                reply.method
            )));
        }
        reply.result
    }
}
