//! Server configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::Error;

/// Default IPC address for the server.
pub const DEFAULT_IPC_ADDRESS: &str = "ipc:///tmp/sieve.sock";

/// Default directory file.
pub const DEFAULT_DIRECTORY_PATH: &str = "./config/directory.yaml";

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Default maximum message size (64 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Environment variable holding the HS256 secret for JWT bearer tokens.
pub const JWT_SECRET_ENV: &str = "SIEVE_JWT_SECRET";

/// Environment variable naming the PEM file with the TLS certificate and key.
pub const TLS_CERT_KEY_ENV: &str = "SIEVE_TLS_CERT_KEY";

const TLS_SCHEME: &str = "tls+tcp://";
const PLAIN_SCHEME: &str = "tcp://";
const IPC_SCHEME: &str = "ipc://";

fn default_transport_workers() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
        .max(1)
}

/// Sieve server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// TCP address to bind to (e.g., "tls+tcp://0.0.0.0:8443").
    pub tcp_address: Option<String>,

    /// IPC address to bind to (e.g., "ipc:///tmp/sieve.sock").
    pub ipc_address: Option<String>,

    /// Directory file with identities, roles, policies and sources.
    pub directory_path: PathBuf,

    /// Deadline applied to every request.
    pub request_timeout: Duration,

    /// How long shutdown waits for in-flight requests.
    pub shutdown_timeout: Duration,

    /// Maximum message size in bytes, for requests and replies.
    pub max_message_size: usize,

    /// Number of transport worker loops.
    pub transport_workers: usize,

    /// Permit plain `tcp://` listeners.
    pub allow_insecure: bool,

    /// HS256 secret; when set, bearer tokens are JWTs.
    pub jwt_secret: Option<String>,

    /// PEM file holding the certificate chain followed by its unencrypted
    /// private key, for `tls+tcp://` listeners.
    pub tls_cert_key: Option<PathBuf>,
}

impl ServerConfig {
    pub fn new(directory_path: impl Into<PathBuf>) -> Self {
        Self {
            tcp_address: None,
            ipc_address: Some(DEFAULT_IPC_ADDRESS.to_string()),
            directory_path: directory_path.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            transport_workers: default_transport_workers(),
            allow_insecure: false,
            jwt_secret: None,
            tls_cert_key: None,
        }
    }

    pub fn with_tcp_address(mut self, address: impl Into<String>) -> Self {
        self.tcp_address = Some(address.into());
        self
    }

    pub fn without_tcp(mut self) -> Self {
        self.tcp_address = None;
        self
    }

    pub fn with_ipc_address(mut self, address: impl Into<String>) -> Self {
        self.ipc_address = Some(address.into());
        self
    }

    pub fn without_ipc(mut self) -> Self {
        self.ipc_address = None;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_transport_workers(mut self, workers: usize) -> Self {
        self.transport_workers = workers.max(1);
        self
    }

    pub fn with_allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    pub fn with_tls_cert_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_cert_key = Some(path.into());
        self
    }

    /// Whether `address` is served over TLS.
    pub fn is_tls(address: &str) -> bool {
        address.starts_with(TLS_SCHEME)
    }

    /// Check if at least one transport is configured.
    pub fn has_transport(&self) -> bool {
        self.tcp_address.is_some() || self.ipc_address.is_some()
    }

    /// Reject configurations the transport must not start with.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.has_transport() {
            return Err(Error::Config(
                "no transport configured (need TCP or IPC address)".to_string(),
            ));
        }
        if let Some(tcp) = &self.tcp_address {
            if tcp.starts_with(PLAIN_SCHEME) {
                if !self.allow_insecure {
                    return Err(Error::Config(format!(
                        "{tcp} is not encrypted; use {TLS_SCHEME} or pass --allow-insecure"
                    )));
                }
            } else if !Self::is_tls(tcp) {
                return Err(Error::Config(format!(
                    "unsupported TCP address {tcp}: expected {TLS_SCHEME}host:port"
                )));
            } else if !cfg!(feature = "tls") {
                return Err(Error::Config(format!(
                    "{tcp} needs TLS support; rebuild sieve-server with the `tls` feature"
                )));
            } else if self.tls_cert_key.is_none() {
                return Err(Error::Config(format!(
                    "{tcp} needs a certificate; pass --tls-cert-key"
                )));
            }
        }
        if let Some(ipc) = &self.ipc_address {
            if !ipc.starts_with(IPC_SCHEME) {
                return Err(Error::Config(format!(
                    "unsupported IPC address {ipc}: expected {IPC_SCHEME}path"
                )));
            }
        }
        if self.max_message_size == 0 {
            return Err(Error::Config("max message size must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DIRECTORY_PATH)
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("tcp_address", &self.tcp_address)
            .field("ipc_address", &self.ipc_address)
            .field("directory_path", &self.directory_path)
            .field("request_timeout", &self.request_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("max_message_size", &self.max_message_size)
            .field("transport_workers", &self.transport_workers)
            .field("allow_insecure", &self.allow_insecure)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("tls_cert_key", &self.tls_cert_key)
            .finish()
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "sieve-server")]
#[command(version, about = "Sieve privacy-enforcing data connector", long_about = None)]
pub struct Args {
    /// Directory file with identities, roles, policies and sources.
    #[arg(short, long, env = "SIEVE_DIRECTORY", default_value = DEFAULT_DIRECTORY_PATH)]
    pub directory: PathBuf,

    /// TCP address to bind to, e.g. tls+tcp://0.0.0.0:8443 (optional).
    #[arg(long)]
    pub tcp: Option<String>,

    /// IPC address to bind to.
    #[arg(long, default_value = DEFAULT_IPC_ADDRESS)]
    pub ipc: String,

    /// Disable IPC transport (requires --tcp to be set).
    #[arg(long)]
    pub no_ipc: bool,

    /// PEM file with the TLS certificate chain and private key.
    #[arg(long, env = TLS_CERT_KEY_ENV)]
    pub tls_cert_key: Option<PathBuf>,

    /// Accept plain tcp:// listeners.
    #[arg(long)]
    pub allow_insecure: bool,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Seconds to wait for in-flight requests on shutdown.
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout: u64,

    /// Maximum message size in megabytes.
    #[arg(long, default_value_t = 64)]
    pub max_message_mb: usize,

    /// Transport worker loops (0 = auto).
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// HS256 secret for JWT bearer tokens.
    #[arg(long, env = JWT_SECRET_ENV, hide_env_values = true)]
    pub jwt_secret: Option<String>,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        let ipc_address = if self.no_ipc { None } else { Some(self.ipc) };
        let transport_workers = if self.workers == 0 {
            default_transport_workers()
        } else {
            self.workers.max(1)
        };

        ServerConfig {
            tcp_address: self.tcp,
            ipc_address,
            directory_path: self.directory,
            request_timeout: Duration::from_secs(self.timeout),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
            max_message_size: self.max_message_mb * 1024 * 1024,
            transport_workers,
            allow_insecure: self.allow_insecure,
            jwt_secret: self.jwt_secret.filter(|s| !s.is_empty()),
            tls_cert_key: self.tls_cert_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.tcp_address.is_none());
        assert_eq!(config.ipc_address, Some(DEFAULT_IPC_ADDRESS.to_string()));
        assert_eq!(config.directory_path, PathBuf::from(DEFAULT_DIRECTORY_PATH));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.max_message_size, 64 * 1024 * 1024);
        assert!(config.transport_workers >= 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_plain_tcp_requires_opt_in() {
        let config = ServerConfig::default().with_tcp_address("tcp://127.0.0.1:9000");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        config.with_allow_insecure(true).validate().unwrap();
    }

    #[test]
    fn test_tls_listener_needs_certificate() {
        let config = ServerConfig::default().with_tcp_address("tls+tcp://0.0.0.0:8443");
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = config.with_tls_cert_key("/etc/sieve/server.pem");
        if cfg!(feature = "tls") {
            config.validate().unwrap();
        } else {
            match config.validate() {
                Err(Error::Config(msg)) => assert!(msg.contains("`tls` feature"), "{msg}"),
                other => panic!("expected a config error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_schemes_rejected() {
        let config = ServerConfig::default().with_tcp_address("ws://0.0.0.0:8443");
        assert!(config.validate().is_err());
        let config = ServerConfig::default().with_ipc_address("/tmp/sieve.sock");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_transport() {
        let config = ServerConfig::default().without_ipc();
        assert!(!config.has_transport());
        assert!(config.validate().is_err());

        let config = config.with_ipc_address("ipc:///tmp/sieve.sock");
        config.validate().unwrap();
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "sieve-server",
            "--directory",
            "/etc/sieve/directory.yaml",
            "--no-ipc",
            "--tcp",
            "tls+tcp://0.0.0.0:8443",
            "--tls-cert-key",
            "/etc/sieve/server.pem",
            "--timeout",
            "5",
            "--max-message-mb",
            "8",
            "--workers",
            "3",
            "--jwt-secret",
            "hunter2",
        ]);
        let config = args.into_config();
        assert!(config.ipc_address.is_none());
        assert_eq!(config.tcp_address.as_deref(), Some("tls+tcp://0.0.0.0:8443"));
        assert_eq!(
            config.tls_cert_key,
            Some(PathBuf::from("/etc/sieve/server.pem"))
        );
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_message_size, 8 * 1024 * 1024);
        assert_eq!(config.transport_workers, 3);
        assert_eq!(config.jwt_secret.as_deref(), Some("hunter2"));
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
