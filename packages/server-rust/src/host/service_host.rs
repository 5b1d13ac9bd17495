//! Default network listener with deferred startup.
//!
//! A [`ServiceHost`] collects endpoints while `Created`; nothing is bound
//! until `open()`. Endpoints sharing a bind target (TCP socket address or
//! pipe socket path) are served by one accept loop that routes requests by
//! path.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use http::Uri;
use svchost_core::endpoint::LOCAL_HOST;
use svchost_core::ServiceFactory;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::HostConfig;
use super::dispatch::{serve_lines, Dispatcher, LineListener, Route};
use super::lifecycle::{ListenerLifecycle, ListenerState};
use super::metadata::ServiceDescription;
use super::web::build_router;
use super::{ImplementationType, Listener, ListenerObserver, ServiceEndpoint};
use crate::binding::{Binding, Transport};
use crate::error::HostError;

/// Where a group of endpoints is served.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BindTarget {
    Tcp(String),
    Pipe(PathBuf),
    Http(String),
    Https(String),
}

#[derive(Debug)]
struct BindGroup {
    target: BindTarget,
    routes: Vec<(String, Route)>,
}

/// Hosts one implementation type over `net.tcp`, `net.pipe`, `http`, and
/// `https` endpoints.
pub struct ServiceHost {
    implementation: ImplementationType,
    config: Arc<HostConfig>,
    observer: Arc<dyn ListenerObserver>,
    endpoints: Vec<ServiceEndpoint>,
    metadata_enabled: bool,
    lifecycle: Arc<ListenerLifecycle>,
    tasks: Vec<JoinHandle<()>>,
    socket_files: Vec<PathBuf>,
    local_addresses: Vec<SocketAddr>,
}

impl ServiceHost {
    #[must_use]
    pub fn new(
        implementation: ImplementationType,
        config: Arc<HostConfig>,
        observer: Arc<dyn ListenerObserver>,
    ) -> Self {
        Self {
            implementation,
            config,
            observer,
            endpoints: Vec::new(),
            metadata_enabled: false,
            lifecycle: Arc::new(ListenerLifecycle::new()),
            tasks: Vec::new(),
            socket_files: Vec::new(),
            local_addresses: Vec::new(),
        }
    }

    /// Socket addresses actually bound by `open()`, in bind order.
    ///
    /// Differs from the configured address when port 0 is used.
    #[must_use]
    pub fn local_addresses(&self) -> &[SocketAddr] {
        &self.local_addresses
    }

    /// Unix socket files created for `net.pipe` endpoints.
    #[must_use]
    pub fn socket_files(&self) -> &[PathBuf] {
        &self.socket_files
    }

    #[must_use]
    pub fn publishes_metadata(&self) -> bool {
        self.metadata_enabled
    }

    /// Groups endpoints by bind target, preserving endpoint order.
    fn plan(&self) -> anyhow::Result<Vec<BindGroup>> {
        let mut groups: Vec<BindGroup> = Vec::new();

        for endpoint in &self.endpoints {
            let route = if endpoint.is_metadata() {
                if !self.metadata_enabled {
                    debug!(
                        "Skipping {}: metadata publishing is not enabled",
                        endpoint.address
                    );
                    continue;
                }
                Route::Metadata
            } else {
                Route::Service {
                    contract: endpoint.contract.clone(),
                }
            };

            let uri = parse_address(&endpoint.address)?;
            let target = self.bind_target(&uri, endpoint.binding.transport())?;
            let path = uri.path().to_string();

            match groups.iter_mut().find(|group| group.target == target) {
                Some(group) => group.routes.push((path, route)),
                None => groups.push(BindGroup {
                    target,
                    routes: vec![(path, route)],
                }),
            }
        }

        Ok(groups)
    }

    fn bind_target(&self, uri: &Uri, transport: Transport) -> anyhow::Result<BindTarget> {
        let host = uri.host().unwrap_or(LOCAL_HOST);
        let socket = || {
            let port = uri.port_u16().or(transport.default_port()).unwrap_or(0);
            format!("{host}:{port}")
        };

        Ok(match transport {
            Transport::Tcp => BindTarget::Tcp(socket()),
            Transport::Http => BindTarget::Http(socket()),
            Transport::Https => {
                if self.config.tls.is_none() {
                    bail!("https endpoint {uri} requires a TLS certificate and key");
                }
                BindTarget::Https(socket())
            }
            Transport::NamedPipe => {
                if !cfg!(unix) {
                    bail!("net.pipe endpoints are not supported on this platform");
                }
                BindTarget::Pipe(self.config.pipe_dir.join(pipe_file_name(host, uri.path())))
            }
        })
    }

    async fn bind_all(&mut self, factory: ServiceFactory) -> anyhow::Result<()> {
        let groups = self.plan()?;
        let service = self.implementation.key();
        let instance = factory();
        let description = Arc::new(ServiceDescription::describe(&service, &self.endpoints));

        for group in groups {
            let mut dispatcher = Dispatcher::new(
                service.clone(),
                Arc::clone(&instance),
                Arc::clone(&description),
                Arc::clone(&self.observer),
                Arc::clone(&self.lifecycle),
            );
            for (path, route) in group.routes {
                dispatcher.add_route(&path, route);
            }
            let dispatcher = Arc::new(dispatcher);

            match group.target {
                BindTarget::Tcp(address) => {
                    let listener = self.bind_tcp(&address).await?;
                    self.spawn_lines(LineListener::Tcp(listener), dispatcher);
                }
                BindTarget::Pipe(path) => {
                    let listener = self.bind_pipe(&path)?;
                    self.spawn_lines(listener, dispatcher);
                }
                BindTarget::Http(address) => {
                    let listener = self.bind_tcp(&address).await?;
                    self.spawn_http(listener, dispatcher);
                }
                BindTarget::Https(address) => {
                    let listener = self.bind_tcp(&address).await?;
                    self.spawn_https(listener, dispatcher).await?;
                }
            }
        }

        Ok(())
    }

    async fn bind_tcp(&mut self, address: &str) -> anyhow::Result<TcpListener> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("unable to bind {address}"))?;
        let local = listener.local_addr()?;
        debug!("{} bound {local}", self.implementation.key());
        self.local_addresses.push(local);
        Ok(listener)
    }

    #[cfg(unix)]
    fn bind_pipe(&mut self, path: &Path) -> anyhow::Result<LineListener> {
        std::fs::create_dir_all(&self.config.pipe_dir).with_context(|| {
            format!("unable to create pipe directory {}", self.config.pipe_dir.display())
        })?;
        if path.exists() {
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                bail!("pipe {} is already in use", path.display());
            }
            std::fs::remove_file(path)
                .with_context(|| format!("unable to remove stale pipe {}", path.display()))?;
        }
        let listener = tokio::net::UnixListener::bind(path)
            .with_context(|| format!("unable to bind pipe {}", path.display()))?;
        debug!("{} bound pipe {}", self.implementation.key(), path.display());
        self.socket_files.push(path.to_path_buf());
        Ok(LineListener::Unix(listener))
    }

    #[cfg(not(unix))]
    fn bind_pipe(&mut self, path: &Path) -> anyhow::Result<LineListener> {
        bail!("unable to bind pipe {}: not supported on this platform", path.display())
    }

    fn spawn_lines(&mut self, listener: LineListener, dispatcher: Arc<Dispatcher>) {
        let connection = self.config.connection.clone();
        self.tasks
            .push(tokio::spawn(serve_lines(listener, dispatcher, connection)));
    }

    fn spawn_http(&mut self, listener: TcpListener, dispatcher: Arc<Dispatcher>) {
        let shutdown = shutdown_signal(self.lifecycle.shutdown_receiver());
        let router = build_router(Arc::clone(&dispatcher));

        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                dispatcher.fault(&format!("http server failed: {e}"));
            }
        }));
    }

    /// Serves TLS connections using `axum-server` with rustls.
    ///
    /// Reuses the pre-bound TCP listener by converting it to a
    /// `std::net::TcpListener`.
    async fn spawn_https(
        &mut self,
        listener: TcpListener,
        dispatcher: Arc<Dispatcher>,
    ) -> anyhow::Result<()> {
        use axum_server::tls_rustls::RustlsConfig;

        let Some(tls) = self.config.tls.as_ref() else {
            bail!("https requires a TLS certificate and key");
        };
        let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

        let std_listener = listener.into_std()?;
        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let shutdown = shutdown_signal(self.lifecycle.shutdown_receiver());
        self.tasks.push(tokio::spawn(async move {
            shutdown.await;
            shutdown_handle.graceful_shutdown(None);
        }));

        let router = build_router(Arc::clone(&dispatcher));
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = axum_server::from_tcp_rustls(std_listener, rustls_config)
                .handle(handle)
                .serve(router.into_make_service())
                .await
            {
                dispatcher.fault(&format!("https server failed: {e}"));
            }
        }));
        Ok(())
    }

    fn stop_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn remove_socket_files(&mut self) {
        for path in self.socket_files.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!("Unable to remove pipe {}: {e}", path.display());
            }
        }
    }
}

#[async_trait]
impl Listener for ServiceHost {
    fn implementation(&self) -> &ImplementationType {
        &self.implementation
    }

    fn add_service_endpoint(
        &mut self,
        contract: &str,
        binding: Binding,
        address: &str,
    ) -> Result<(), HostError> {
        if self.lifecycle.state() != ListenerState::Created {
            return Err(HostError::AlreadyOpened);
        }

        let uri = parse_address(address)?;
        let expected = binding.transport().scheme();
        if !uri
            .scheme_str()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case(expected))
        {
            return Err(HostError::SchemeMismatch {
                binding: binding.name().to_string(),
                expected,
                address: address.to_string(),
            });
        }

        self.endpoints.push(ServiceEndpoint {
            contract: contract.to_string(),
            binding,
            address: address.to_string(),
        });
        Ok(())
    }

    fn add_metadata_behavior(&mut self) -> bool {
        !std::mem::replace(&mut self.metadata_enabled, true)
    }

    fn endpoints(&self) -> &[ServiceEndpoint] {
        &self.endpoints
    }

    fn state(&self) -> ListenerState {
        self.lifecycle.state()
    }

    async fn open(&mut self) -> anyhow::Result<()> {
        let service = self.implementation.key();
        let state = self.lifecycle.state();
        if state != ListenerState::Created {
            bail!("cannot open {service}: listener is {state}");
        }
        if self.endpoints.is_empty() {
            bail!("cannot open {service}: no endpoints configured");
        }
        let Some(factory) = self.implementation.factory() else {
            bail!("cannot open {service}: no code is linked for this type");
        };

        self.lifecycle.set_state(ListenerState::Opening);
        if let Err(e) = self.bind_all(factory).await {
            let reason = format!("{e:#}");
            if self.lifecycle.fault() {
                warn!("{service} faulted: {reason}");
                self.observer.on_fault(&service, &reason);
            }
            self.stop_tasks();
            self.remove_socket_files();
            return Err(e.context(format!("unable to open {service}")));
        }

        self.lifecycle.set_state(ListenerState::Opened);
        info!("Opened {service} with {} endpoint(s)", self.endpoints.len());
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        let service = self.implementation.key();
        match self.lifecycle.state() {
            ListenerState::Created => {
                self.lifecycle.set_state(ListenerState::Closed);
                return Ok(());
            }
            ListenerState::Opened => {}
            state => bail!("cannot close {service}: listener is {state}"),
        }

        self.lifecycle.set_state(ListenerState::Closing);
        self.lifecycle.trigger_shutdown();

        let deadline = tokio::time::Instant::now() + self.config.close_timeout;
        for task in &mut self.tasks {
            if tokio::time::timeout_at(deadline, task).await.is_err() {
                bail!(
                    "timed out closing {service} after {:?}",
                    self.config.close_timeout
                );
            }
        }
        self.tasks.clear();

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if !self.lifecycle.wait_for_drain(remaining).await {
            bail!(
                "{} request(s) still in flight on {service}",
                self.lifecycle.in_flight_count()
            );
        }

        self.remove_socket_files();
        self.lifecycle.set_state(ListenerState::Closed);
        info!("Closed {service}");
        Ok(())
    }

    async fn abort(&mut self) -> anyhow::Result<()> {
        self.lifecycle.trigger_shutdown();
        self.stop_tasks();
        self.remove_socket_files();
        self.lifecycle.set_state(ListenerState::Closed);
        debug!("Aborted {}", self.implementation.key());
        Ok(())
    }
}

impl Drop for ServiceHost {
    fn drop(&mut self) {
        self.stop_tasks();
        self.remove_socket_files();
    }
}

/// Parses an absolute endpoint address.
fn parse_address(address: &str) -> Result<Uri, HostError> {
    let invalid = |reason: String| HostError::InvalidAddress {
        address: address.to_string(),
        reason,
    };
    let uri: Uri = address.parse().map_err(|e: http::uri::InvalidUri| invalid(e.to_string()))?;
    if uri.scheme().is_none() || uri.host().is_none() {
        return Err(invalid("an absolute address with a host is required".to_string()));
    }
    Ok(uri)
}

/// Socket file name for a pipe address (`localhost/Calc` -> `localhost_Calc.sock`).
fn pipe_file_name(host: &str, path: &str) -> String {
    let name: String = format!("{host}{path}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    format!("{}.sock", name.trim_end_matches('_'))
}

fn shutdown_signal(
    mut shutdown: watch::Receiver<bool>,
) -> impl std::future::Future<Output = ()> + Send + 'static {
    async move {
        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    }
}
