//! Test fixtures: module image builders, linked test services, and
//! recording listeners.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use svchost_core::{
    EmbeddedResource, InvokeError, ModuleManifest, ServiceInstance, ServiceRegistration,
    TypeDescriptor, TypeKind, MODULE_EXTENSION,
};

use crate::binding::Binding;
use crate::error::HostError;
use crate::host::{
    ImplementationType, Listener, ListenerFactory, ListenerObserver, ListenerState,
    ServiceEndpoint,
};

// ---------------------------------------------------------------------------
// Module images
// ---------------------------------------------------------------------------

/// Builder for module images written to a test folder.
#[derive(Debug, Clone)]
pub struct ModuleImage {
    manifest: ModuleManifest,
}

impl ModuleImage {
    pub fn new(name: &str) -> Self {
        Self {
            manifest: ModuleManifest {
                name: name.to_string(),
                ..ModuleManifest::default()
            },
        }
    }

    pub fn reference(mut self, reference: &str) -> Self {
        self.manifest.references.push(reference.to_string());
        self
    }

    pub fn interface(self, name: &str) -> Self {
        self.interface_extending(name, &[])
    }

    pub fn interface_extending(mut self, name: &str, extends: &[&str]) -> Self {
        self.manifest.types.push(TypeDescriptor {
            name: name.to_string(),
            kind: TypeKind::Interface,
            is_abstract: false,
            base: None,
            implements: Vec::new(),
            extends: extends.iter().map(ToString::to_string).collect(),
        });
        self
    }

    pub fn class(self, name: &str, implements: &[&str]) -> Self {
        self.push_class(name, None, implements, false)
    }

    pub fn abstract_class(self, name: &str, implements: &[&str]) -> Self {
        self.push_class(name, None, implements, true)
    }

    pub fn derived_class(self, name: &str, base: &str) -> Self {
        self.push_class(name, Some(base), &[], false)
    }

    pub fn resource(mut self, name: &str, content: &str) -> Self {
        self.manifest.resources.push(EmbeddedResource {
            name: name.to_string(),
            content: content.to_string(),
        });
        self
    }

    /// Embeds an endpoint configuration built from
    /// `(name, address, binding, contract)` rows.
    pub fn endpoints(self, rows: &[(&str, &str, &str, &str)]) -> Self {
        let resource = format!("{}.endpoints.config", self.manifest.name);
        self.resource(&resource, &endpoints_config(rows))
    }

    fn push_class(mut self, name: &str, base: Option<&str>, implements: &[&str], is_abstract: bool) -> Self {
        self.manifest.types.push(TypeDescriptor {
            name: name.to_string(),
            kind: TypeKind::Class,
            is_abstract,
            base: base.map(ToString::to_string),
            implements: implements.iter().map(ToString::to_string).collect(),
            extends: Vec::new(),
        });
        self
    }
}

/// Writes `image` as `<dir>/<name>.module` and returns its path.
pub fn write_module(dir: &Path, image: &ModuleImage) -> PathBuf {
    let path = dir.join(format!("{}.{MODULE_EXTENSION}", image.manifest.name));
    let json = serde_json::to_string_pretty(&image.manifest).unwrap();
    std::fs::write(&path, json).unwrap();
    path
}

/// Renders an endpoint configuration document.
pub fn endpoints_config(rows: &[(&str, &str, &str, &str)]) -> String {
    let endpoints: String = rows
        .iter()
        .map(|(name, address, binding, contract)| {
            format!(
                r#"  <Endpoint Name="{name}" Address="{address}" Binding="{binding}" Contract="{contract}" />
"#
            )
        })
        .collect();
    format!("<Config>\n{endpoints}</Config>\n")
}

// ---------------------------------------------------------------------------
// Linked services
// ---------------------------------------------------------------------------

/// Code behind `Tests.Services.Calculator`.
pub struct Calculator;

impl ServiceInstance for Calculator {
    fn invoke(&self, operation: &str, body: Value) -> Result<Value, InvokeError> {
        let operand = |name: &str| {
            body.get(name)
                .and_then(Value::as_i64)
                .ok_or_else(|| anyhow::anyhow!("missing integer operand {name}"))
        };
        match operation {
            "Add" => Ok(json!(operand("a")? + operand("b")?)),
            "Negate" => Ok(json!(-operand("a")?)),
            other => Err(InvokeError::UnknownOperation(other.to_string())),
        }
    }
}

pub fn calculator() -> Arc<dyn ServiceInstance> {
    Arc::new(Calculator)
}

inventory::submit! {
    ServiceRegistration::new("Tests.Services.Calculator", calculator)
}

// ---------------------------------------------------------------------------
// Observers and listeners
// ---------------------------------------------------------------------------

/// Observer that keeps every event it receives.
#[derive(Default)]
pub struct RecordingObserver {
    unknown: Mutex<Vec<String>>,
    faults: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn unknown_messages(&self) -> Vec<String> {
        self.unknown.lock().clone()
    }

    pub fn faults(&self) -> Vec<String> {
        self.faults.lock().clone()
    }
}

impl ListenerObserver for RecordingObserver {
    fn on_unknown_message(&self, service: &str, message: &str) {
        self.unknown.lock().push(format!("{service}: {message}"));
    }

    fn on_fault(&self, service: &str, reason: &str) {
        self.faults.lock().push(format!("{service}: {reason}"));
    }
}

/// Listener that records lifecycle calls instead of binding sockets.
pub struct RecordingListener {
    implementation: ImplementationType,
    endpoints: Vec<ServiceEndpoint>,
    metadata_enabled: bool,
    state: ListenerState,
    failures: Arc<Failures>,
    events: Arc<Mutex<Vec<String>>>,
    observer: Arc<dyn ListenerObserver>,
}

#[async_trait]
impl Listener for RecordingListener {
    fn implementation(&self) -> &ImplementationType {
        &self.implementation
    }

    fn add_service_endpoint(&mut self, contract: &str, binding: Binding, address: &str) -> Result<(), HostError> {
        if self.state != ListenerState::Created {
            return Err(HostError::AlreadyOpened);
        }
        let expected = binding.transport().scheme();
        if crate::binding::scheme_of(address) != Some(expected) {
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
        self.state
    }

    async fn open(&mut self) -> anyhow::Result<()> {
        let key = self.implementation.key();
        self.events.lock().push(format!("open {key}"));
        if self.failures.open.contains(&key) {
            self.state = ListenerState::Faulted;
            self.observer.on_fault(&key, "open refused");
            anyhow::bail!("open refused for {key}");
        }
        self.state = ListenerState::Opened;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        let key = self.implementation.key();
        self.events.lock().push(format!("close {key}"));
        if self.failures.close.contains(&key) || self.state == ListenerState::Faulted {
            anyhow::bail!("close refused for {key}");
        }
        self.state = ListenerState::Closed;
        Ok(())
    }

    async fn abort(&mut self) -> anyhow::Result<()> {
        let key = self.implementation.key();
        self.events.lock().push(format!("abort {key}"));
        if self.failures.abort.contains(&key) {
            anyhow::bail!("abort refused for {key}");
        }
        self.state = ListenerState::Closed;
        Ok(())
    }
}

/// Implementation keys whose lifecycle calls fail.
#[derive(Debug, Default)]
pub struct Failures {
    pub open: HashSet<String>,
    pub close: HashSet<String>,
    pub abort: HashSet<String>,
}

/// Creates [`RecordingListener`]s that share one event log.
#[derive(Default)]
pub struct RecordingListenerFactory {
    failures: Arc<Failures>,
    events: Arc<Mutex<Vec<String>>>,
    created: Mutex<Vec<String>>,
}

impl RecordingListenerFactory {
    pub fn failing(failures: Failures) -> Self {
        Self {
            failures: Arc::new(failures),
            ..Self::default()
        }
    }

    /// Lifecycle calls in the order they happened (`open <key>`, ...).
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Keys of every listener created, in creation order.
    pub fn created(&self) -> Vec<String> {
        self.created.lock().clone()
    }
}

impl ListenerFactory for RecordingListenerFactory {
    fn create(&self, implementation: ImplementationType, observer: Arc<dyn ListenerObserver>) -> Box<dyn Listener> {
        self.created.lock().push(implementation.key());
        Box::new(RecordingListener {
            implementation,
            endpoints: Vec::new(),
            metadata_enabled: false,
            state: ListenerState::Created,
            failures: Arc::clone(&self.failures),
            events: Arc::clone(&self.events),
            observer,
        })
    }
}
