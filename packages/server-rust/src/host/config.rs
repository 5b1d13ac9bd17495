//! Listener configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by every listener a factory creates.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// TLS material for `https` endpoints. `https` endpoints fail to open
    /// without it.
    pub tls: Option<TlsConfig>,
    /// Directory holding the Unix sockets behind `net.pipe` endpoints.
    pub pipe_dir: PathBuf,
    /// Maximum time `close()` waits for accept loops and in-flight requests.
    pub close_timeout: Duration,
    /// Per-connection settings.
    pub connection: ConnectionConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tls: None,
            pipe_dir: std::env::temp_dir().join("svchost"),
            close_timeout: Duration::from_secs(30),
            connection: ConnectionConfig::default(),
        }
    }
}

/// TLS certificate configuration.
///
/// No `Default` impl because certificate paths have no sensible defaults.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the PEM certificate chain.
    pub cert_path: PathBuf,
    /// Path to the PEM private key.
    pub key_path: PathBuf,
}

/// Per-connection limits for line-framed transports.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Longest accepted request line in bytes.
    pub max_line_length: usize,
    /// Connections idle for longer than this are dropped.
    pub idle_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_line_length: 1_048_576, // 1 MiB
            idle_timeout: Duration::from_secs(300),
        }
    }
}
