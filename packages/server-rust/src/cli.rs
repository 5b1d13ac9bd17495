//! Command-line surface of the `svchost` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::host::{HostConfig, NetworkListenerFactory, TlsConfig};
use crate::hosting::{HostingOptions, HostingOrchestrator};

/// Hosts the services found in contract and service modules.
///
/// Pass one folder to host every `*.contracts.*` and `*.services.*` module
/// in it, one contract module to host it with the service modules next to
/// it, or a contract module followed by service modules.
#[derive(Debug, Parser)]
#[command(name = "svchost", version)]
pub struct Cli {
    /// Folder, contract module, or contract module followed by service modules
    pub paths: Vec<PathBuf>,

    /// PEM certificate chain for https endpoints
    #[arg(long, env = "SVCHOST_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for https endpoints
    #[arg(long, env = "SVCHOST_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Directory for the Unix sockets behind net.pipe endpoints
    #[arg(long, env = "SVCHOST_PIPE_DIR")]
    pub pipe_dir: Option<PathBuf>,

    /// Seconds a listener may take to close gracefully before it is aborted
    #[arg(long, env = "SVCHOST_CLOSE_TIMEOUT_SECS", default_value_t = 30)]
    pub close_timeout_secs: u64,

    /// Log output format
    #[arg(long, env = "SVCHOST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// How the orchestrator is constructed from the positional paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    Folder(PathBuf),
    Contract(PathBuf),
    Explicit {
        contract: PathBuf,
        services: Vec<PathBuf>,
    },
}

impl Cli {
    /// The launch mode for the given paths, or `None` when they select
    /// nothing (no paths, or a single path that does not exist).
    #[must_use]
    pub fn launch_mode(&self) -> Option<LaunchMode> {
        match self.paths.as_slice() {
            [path] if path.is_dir() => Some(LaunchMode::Folder(path.clone())),
            [path] if path.is_file() => Some(LaunchMode::Contract(path.clone())),
            [contract, services @ ..] if !services.is_empty() => Some(LaunchMode::Explicit {
                contract: contract.clone(),
                services: services.to_vec(),
            }),
            _ => None,
        }
    }

    /// Listener configuration from the command-line flags.
    #[must_use]
    pub fn host_config(&self) -> HostConfig {
        let defaults = HostConfig::default();
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        };
        HostConfig {
            tls,
            pipe_dir: self.pipe_dir.clone().unwrap_or(defaults.pipe_dir),
            close_timeout: Duration::from_secs(self.close_timeout_secs),
            connection: defaults.connection,
        }
    }
}

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = installed {
        eprintln!("logging already initialised: {e}");
    }
}

/// Constructs the orchestrator for `cli`, runs it until Ctrl-C, and stops
/// it.
///
/// Prints usage and returns `Ok` when the paths select no launch mode.
///
/// # Errors
///
/// Returns an error if construction fails or the Ctrl-C handler cannot be
/// installed. The orchestrator is stopped before a signal error is
/// returned.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    init_logging(cli.log_format);

    let Some(mode) = cli.launch_mode() else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let options = HostingOptions {
        listener_factory: std::sync::Arc::new(NetworkListenerFactory::new(cli.host_config())),
        ..HostingOptions::default()
    };
    let mut orchestrator = match mode {
        LaunchMode::Folder(folder) => HostingOrchestrator::from_folder(folder, options)?,
        LaunchMode::Contract(contract) => HostingOrchestrator::from_contract(contract, options)?,
        LaunchMode::Explicit { contract, services } => {
            HostingOrchestrator::from_contract_and_services(contract, &services, options)?
        }
    };

    orchestrator.start().await;
    info!("Hosting {} service(s); press Ctrl-C to stop", orchestrator.host_count());
    let signal = tokio::signal::ctrl_c().await;
    orchestrator.stop().await;
    signal?;
    Ok(())
}
