//! Request routing and the line-delimited JSON transport.
//!
//! Every bind group of a [`ServiceHost`](super::ServiceHost) owns one
//! [`Dispatcher`] mapping request paths to routes. `net.tcp` and `net.pipe`
//! connections speak one JSON request per line and receive one JSON reply
//! per line; HTTP requests are routed through the same dispatcher.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use svchost_core::{InvokeError, ServiceInstance};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use super::config::ConnectionConfig;
use super::lifecycle::ListenerLifecycle;
use super::metadata::{ServiceDescription, GET_ACTION};
use super::ListenerObserver;

/// A request read from a line-framed connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    /// Request path. May be omitted when the connection serves one route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub action: String,
    #[serde(default)]
    pub body: Value,
}

/// A reply written for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WireReply {
    #[must_use]
    pub fn success(body: Value) -> Self {
        Self {
            ok: true,
            body,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            body: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// What a request path resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// A service endpoint exposing `contract`.
    Service { contract: String },
    /// A metadata-exchange endpoint.
    Metadata,
}

/// Normalizes a request path: no trailing slash, `/` for the root.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Routes requests for one bind group to the hosted instance.
pub struct Dispatcher {
    service: String,
    routes: HashMap<String, Route>,
    instance: Arc<dyn ServiceInstance>,
    description: Arc<ServiceDescription>,
    observer: Arc<dyn ListenerObserver>,
    lifecycle: Arc<ListenerLifecycle>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        service: String,
        instance: Arc<dyn ServiceInstance>,
        description: Arc<ServiceDescription>,
        observer: Arc<dyn ListenerObserver>,
        lifecycle: Arc<ListenerLifecycle>,
    ) -> Self {
        Self {
            service,
            routes: HashMap::new(),
            instance,
            description,
            observer,
            lifecycle,
        }
    }

    pub fn add_route(&mut self, path: &str, route: Route) {
        self.routes.insert(normalize_path(path), route);
    }

    #[must_use]
    pub fn route(&self, path: &str) -> Option<&Route> {
        self.routes.get(&normalize_path(path))
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    pub(crate) fn lifecycle(&self) -> &Arc<ListenerLifecycle> {
        &self.lifecycle
    }

    /// Moves the listener to `Faulted` and notifies the observer once.
    pub(crate) fn fault(&self, reason: &str) {
        if self.lifecycle.fault() {
            warn!("{} faulted: {reason}", self.service);
            self.observer.on_fault(&self.service, reason);
        }
    }

    /// Dispatches one request.
    ///
    /// Without a path, the request goes to the only route when there is
    /// exactly one.
    pub fn dispatch(&self, to: Option<&str>, action: &str, body: Value) -> WireReply {
        let _guard = self.lifecycle.in_flight_guard();

        let route = match to {
            Some(path) => self.route(path),
            None if self.routes.len() == 1 => self.routes.values().next(),
            None => None,
        };
        let Some(route) = route else {
            return self.reject(format!("no endpoint at {}", to.unwrap_or("<unspecified>")));
        };

        match route {
            Route::Metadata if action.eq_ignore_ascii_case(GET_ACTION) => {
                match serde_json::to_value(self.description.as_ref()) {
                    Ok(description) => WireReply::success(description),
                    Err(e) => WireReply::failure(e.to_string()),
                }
            }
            Route::Metadata => self.reject(format!("metadata endpoint has no action {action}")),
            Route::Service { contract } => match self.instance.invoke(action, body) {
                Ok(result) => WireReply::success(result),
                Err(InvokeError::UnknownOperation(operation)) => {
                    self.reject(format!("{contract} has no operation {operation}"))
                }
                Err(InvokeError::Failed(e)) => {
                    warn!("{} failed {action}: {e:#}", self.service);
                    WireReply::failure(format!("{e:#}"))
                }
            },
        }
    }

    /// Parses and dispatches one line of the line-delimited protocol.
    pub fn dispatch_line(&self, line: &str) -> WireReply {
        match serde_json::from_str::<WireRequest>(line) {
            Ok(request) => self.dispatch(request.to.as_deref(), &request.action, request.body),
            Err(e) => self.reject(format!("malformed request: {e}")),
        }
    }

    /// Reports a request that matched no route or operation.
    pub(crate) fn reject(&self, message: String) -> WireReply {
        warn!("{}: {message}", self.service);
        self.observer.on_unknown_message(&self.service, &message);
        WireReply::failure(message)
    }
}

/// A connection accepted by a line listener.
pub(crate) trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// A bound socket serving the line-delimited protocol.
pub(crate) enum LineListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

impl LineListener {
    async fn accept(&self) -> io::Result<Box<dyn Connection>> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }
}

/// Accepts connections until shutdown, then waits for them to finish.
///
/// An accept failure faults the listener.
pub(crate) async fn serve_lines(
    listener: LineListener,
    dispatcher: Arc<Dispatcher>,
    connection: ConnectionConfig,
) {
    let lifecycle = Arc::clone(dispatcher.lifecycle());
    let mut shutdown = lifecycle.shutdown_receiver();
    let mut connections = JoinSet::new();

    while !*shutdown.borrow() {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    connections.spawn(serve_connection(
                        stream,
                        Arc::clone(&dispatcher),
                        connection.clone(),
                        lifecycle.shutdown_receiver(),
                    ));
                }
                Err(e) => {
                    dispatcher.fault(&format!("accept failed: {e}"));
                    break;
                }
            },
            _ = shutdown.changed() => break,
        }
    }

    while connections.join_next().await.is_some() {}
}

/// Serves one line-framed connection until it closes, idles out, or the
/// listener shuts down.
pub(crate) async fn serve_connection<S>(
    stream: S,
    dispatcher: Arc<Dispatcher>,
    config: ConnectionConfig,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(config.max_line_length));

    while !*shutdown.borrow() {
        let reply = tokio::select! {
            next = tokio::time::timeout(config.idle_timeout, framed.next()) => match next {
                Err(_) => {
                    debug!("{}: closing idle connection", dispatcher.service());
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok(line))) if line.trim().is_empty() => continue,
                Ok(Some(Ok(line))) => dispatcher.dispatch_line(&line),
                Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    dispatcher.reject(format!(
                        "request exceeds {} bytes",
                        config.max_line_length
                    ))
                }
                Ok(Some(Err(LinesCodecError::Io(e)))) => {
                    debug!("{}: connection error: {e}", dispatcher.service());
                    break;
                }
            },
            _ = shutdown.changed() => break,
        };

        let line = match serde_json::to_string(&reply) {
            Ok(line) => line,
            Err(e) => {
                warn!("{}: unable to encode reply: {e}", dispatcher.service());
                break;
            }
        };
        if let Err(e) = framed.send(line).await {
            debug!("{}: unable to write reply: {e}", dispatcher.service());
            break;
        }
    }
}
