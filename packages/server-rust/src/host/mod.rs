//! Listeners: the network hosts that expose one implementation type.
//!
//! The orchestrator configures listeners through the [`Listener`] trait and
//! creates them through a [`ListenerFactory`]. [`ServiceHost`] is the
//! default network implementation.

pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod metadata;
pub mod service_host;
pub mod web;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use svchost_core::{QualifiedTypeName, ServiceFactory};

pub use config::{ConnectionConfig, HostConfig, TlsConfig};
pub use lifecycle::{ListenerLifecycle, ListenerState};
pub use service_host::ServiceHost;

use crate::binding::Binding;
use crate::error::HostError;

/// Contract name carried by metadata-exchange endpoints.
pub const METADATA_CONTRACT: &str = "IMetadataExchange";

/// Suffix appended to an endpoint address to form its metadata address.
pub const METADATA_SUFFIX: &str = "/mex";

/// An implementation type selected for hosting.
#[derive(Clone)]
pub struct ImplementationType {
    name: QualifiedTypeName,
    factory: Option<ServiceFactory>,
}

impl ImplementationType {
    #[must_use]
    pub fn new(name: QualifiedTypeName, factory: Option<ServiceFactory>) -> Self {
        Self { name, factory }
    }

    #[must_use]
    pub fn name(&self) -> &QualifiedTypeName {
        &self.name
    }

    /// Stable identity used to key hosts (`Type.Name, Module`).
    #[must_use]
    pub fn key(&self) -> String {
        self.name.to_string()
    }

    /// The linked code, if the declaring module was fully loaded and the
    /// host binary links a registration for this type.
    #[must_use]
    pub fn factory(&self) -> Option<ServiceFactory> {
        self.factory
    }
}

impl fmt::Debug for ImplementationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationType")
            .field("name", &self.name.to_string())
            .field("linked", &self.factory.is_some())
            .finish()
    }
}

/// An endpoint attached to a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub contract: String,
    pub binding: Binding,
    pub address: String,
}

impl ServiceEndpoint {
    #[must_use]
    pub fn is_metadata(&self) -> bool {
        self.binding.is_metadata()
    }
}

/// Receives listener-level events.
///
/// Observers are wired once, when the listener is created, and only
/// report; they never repair or restart the listener.
pub trait ListenerObserver: Send + Sync {
    /// A request did not match any endpoint or operation.
    fn on_unknown_message(&self, service: &str, message: &str);

    /// The listener entered the `Faulted` state.
    fn on_fault(&self, service: &str, reason: &str);
}

/// Observer that fans out to multiple observers.
#[derive(Default)]
pub struct CompositeListenerObserver {
    observers: Vec<Arc<dyn ListenerObserver>>,
}

impl CompositeListenerObserver {
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn ListenerObserver>>) -> Self {
        Self { observers }
    }

    pub fn add(&mut self, observer: Arc<dyn ListenerObserver>) {
        self.observers.push(observer);
    }
}

impl ListenerObserver for CompositeListenerObserver {
    fn on_unknown_message(&self, service: &str, message: &str) {
        for observer in &self.observers {
            observer.on_unknown_message(service, message);
        }
    }

    fn on_fault(&self, service: &str, reason: &str) {
        for observer in &self.observers {
            observer.on_fault(service, reason);
        }
    }
}

/// A host exposing one implementation type over one or more endpoints.
///
/// Follows a deferred startup pattern: endpoints are added while the
/// listener is `Created`, `open()` binds and starts serving, `close()`
/// drains gracefully, and `abort()` tears everything down immediately.
#[async_trait]
pub trait Listener: Send + Sync {
    fn implementation(&self) -> &ImplementationType;

    /// Adds an endpoint exposing `contract` at `address` over `binding`.
    ///
    /// # Errors
    ///
    /// Returns a [`HostError`] if the address is invalid, does not match
    /// the binding's transport, or the listener is no longer `Created`.
    fn add_service_endpoint(
        &mut self,
        contract: &str,
        binding: Binding,
        address: &str,
    ) -> Result<(), HostError>;

    /// Enables metadata publishing. Returns `true` only on the first call.
    fn add_metadata_behavior(&mut self) -> bool;

    fn endpoints(&self) -> &[ServiceEndpoint];

    fn state(&self) -> ListenerState;

    /// Starts serving every endpoint.
    async fn open(&mut self) -> anyhow::Result<()>;

    /// Stops accepting requests and waits for in-flight ones.
    async fn close(&mut self) -> anyhow::Result<()>;

    /// Stops immediately without waiting.
    async fn abort(&mut self) -> anyhow::Result<()>;
}

/// Creates listeners for implementation types.
pub trait ListenerFactory: Send + Sync {
    fn create(
        &self,
        implementation: ImplementationType,
        observer: Arc<dyn ListenerObserver>,
    ) -> Box<dyn Listener>;
}

/// Creates [`ServiceHost`] listeners sharing one [`HostConfig`].
#[derive(Debug, Clone, Default)]
pub struct NetworkListenerFactory {
    config: Arc<HostConfig>,
}

impl NetworkListenerFactory {
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }
}

impl ListenerFactory for NetworkListenerFactory {
    fn create(
        &self,
        implementation: ImplementationType,
        observer: Arc<dyn ListenerObserver>,
    ) -> Box<dyn Listener> {
        Box::new(ServiceHost::new(
            implementation,
            Arc::clone(&self.config),
            observer,
        ))
    }
}
