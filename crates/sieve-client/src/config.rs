//! Client configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default connector address.
pub const DEFAULT_ADDRESS: &str = "ipc:///tmp/sieve.sock";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum message size (64 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Connector address (e.g., "tls+tcp://127.0.0.1:8443" or "ipc:///tmp/sieve.sock").
    pub address: String,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum message size in bytes.
    pub max_message_size: usize,

    /// Raw bearer token; encoded before it is sent.
    pub token: Option<String>,

    /// CA certificates used to verify a `tls+tcp://` connector.
    pub tls_ca_file: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            token: None,
            tls_ca_file: None,
        }
    }

    /// Connect to a connector on this host over IPC.
    pub fn localhost() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_tls_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_ca_file = Some(path.into());
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::localhost()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .field("max_message_size", &self.max_message_size)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("tls_ca_file", &self.tls_ca_file)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("ipc:///tmp/sieve.sock")
            .with_timeout(Duration::from_secs(5))
            .with_max_message_size(1024)
            .with_token("ana-token")
            .with_tls_ca_file("/etc/sieve/ca.pem");
        assert_eq!(config.address, "ipc:///tmp/sieve.sock");
        assert_eq!(config.tls_ca_file, Some(PathBuf::from("/etc/sieve/ca.pem")));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_message_size, 1024);
        assert!(!format!("{config:?}").contains("ana-token"));
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.token.is_none());
    }
}
