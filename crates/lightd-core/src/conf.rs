//! Full node connection settings.
//!
//! Reads the node's own `key = value` configuration text (the `zcash.conf`
//! format) and extracts what is needed to reach its RPC interface.

use std::collections::HashMap;
use std::fmt;

use crate::error::ConfError;

/// Where and how to reach the full node's RPC interface.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// `rpcbind:rpcport`.
    pub host: String,
    pub user: String,
    pub pass: String,
    pub use_tls: bool,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Parse node configuration text, requiring `rpcport` to be present.
    pub fn from_conf(text: &str) -> Result<Self, ConfError> {
        Self::from_conf_with_default_port(text, None)
    }

    /// Parse node configuration text, using `default_port` when `rpcport`
    /// is absent.
    ///
    /// `rpcbind`, `rpcuser` and `rpcpassword` are required. `testnet` is
    /// accepted and ignored; unknown keys are ignored.
    pub fn from_conf_with_default_port(
        text: &str,
        default_port: Option<u16>,
    ) -> Result<Self, ConfError> {
        let entries = parse_entries(text)?;

        let bind = required(&entries, "rpcbind")?;
        let port = match entries.get("rpcport") {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| ConfError::InvalidPort(port.clone()))?,
            None => default_port.ok_or(ConfError::MissingKey("rpcport"))?,
        };
        let user = required(&entries, "rpcuser")?;
        let pass = required(&entries, "rpcpassword")?;

        Ok(Self {
            host: format!("{bind}:{port}"),
            user,
            pass,
            use_tls: false,
        })
    }

    /// Base URL of the node's RPC endpoint.
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}/", self.host)
    }
}

fn required(entries: &HashMap<String, String>, key: &'static str) -> Result<String, ConfError> {
    entries
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or(ConfError::MissingKey(key))
}

/// Split configuration text into key/value pairs. Blank lines and `#`
/// comments are skipped; a later duplicate key overrides an earlier one.
fn parse_entries(text: &str) -> Result<HashMap<String, String>, ConfError> {
    let mut entries = HashMap::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfError::Malformed {
                line: i + 1,
                text: line.to_string(),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfError::EmptyKey { line: i + 1 });
        }
        entries.insert(key.to_string(), value.trim().to_string());
    }
    Ok(entries)
}
