//! Error types for lightd.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("block at height {0} not found")] NotFound(u64),
    #[error("block hash {0} not found")] HashNotFound(String),
    #[error("cache empty")] Empty,
    #[error("height too old: {height} precedes first cached height {first} by more than {retention}")] HeightTooOld { height: u64, first: u64, retention: u64 },
    #[error("height gap: expected {expected}, got {got}")] HeightGap { expected: u64, got: u64 },
    #[error("invalid compact block: {0}")] InvalidBlock(String),
    #[error("corrupt cache state: {0}")] CorruptState(String),
    #[error("storage: {0}")] Storage(String),
}

/// Failure of a call to the full node.
///
/// Node-side errors render as `"<code>: <message>"`, the form clients of
/// `sendrawtransaction` parse back into a numeric code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{code}: {message}")] Node { code: i64, message: String },
    #[error("http transport: {0}")] Http(String),
    #[error("malformed node response: {0}")] MalformedResponse(String),
}

impl TransportError {
    /// The node's numeric error code, if the node produced this error.
    pub fn node_code(&self) -> Option<i64> {
        match self {
            TransportError::Node { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid block json: {0}")] Json(String),
    #[error("missing field: {0}")] MissingField(&'static str),
    #[error("invalid hex in {field}")] InvalidHex { field: &'static str },
    #[error("invalid length for {field}: expected {expected}, got {got}")] InvalidLength { field: &'static str, expected: usize, got: usize },
    #[error("encode: {0}")] Encode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfError {
    #[error("line {line}: expected `key = value`, got {text:?}")] Malformed { line: usize, text: String },
    #[error("line {line}: empty key")] EmptyKey { line: usize },
    #[error("missing required key: {0}")] MissingKey(&'static str),
    #[error("invalid rpcport: {0}")] InvalidPort(String),
}

/// Errors surfaced by the translation service to light clients.
///
/// Validation and unimplemented messages are part of the client contract and
/// are rendered verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")] Validation(String),
    #[error("Cache is empty. Server is probably not yet ready")] NotReady,
    #[error("{0}")] Unimplemented(String),
    #[error(transparent)] Cache(#[from] CacheError),
    #[error(transparent)] Transport(#[from] TransportError),
    #[error("unexpected node response: {0}")] NodeResponse(String),
    #[error("SendTransaction couldn't parse error code: {0}")] SendErrorCode(String),
    #[error("deadline exceeded after {0}s")] DeadlineExceeded(u64),
}

/// Failure bringing up the JSON-RPC server.
#[derive(Error, Debug)]
pub enum LightdError {
    #[error("server: {0}")] Server(String),
}
