//! Link-time registration of service implementation code.
//!
//! Module images only describe types. The code behind a hostable class is
//! a [`ServiceInstance`] registered under the class's full type name:
//!
//! ```ignore
//! inventory::submit! {
//!     ServiceRegistration::new("Acme.Services.Calculator", || Arc::new(Calculator))
//! }
//! ```
//!
//! A host binary must link every crate that submits registrations.

use std::sync::Arc;

use serde_json::Value;

/// Code behind a hosted implementation type.
///
/// One instance serves every endpoint of its listener and may be invoked
/// concurrently.
pub trait ServiceInstance: Send + Sync {
    /// Executes `operation` with a JSON request body.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::UnknownOperation`] when the instance does not
    /// implement `operation`, or [`InvokeError::Failed`] when it does but
    /// the call failed.
    fn invoke(&self, operation: &str, body: Value) -> Result<Value, InvokeError>;
}

/// Errors returned by [`ServiceInstance::invoke`].
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("operation failed: {0}")]
    Failed(#[from] anyhow::Error),
}

/// Creates the instance for an implementation type.
pub type ServiceFactory = fn() -> Arc<dyn ServiceInstance>;

/// Associates a full type name with the factory for its code.
#[derive(Debug)]
pub struct ServiceRegistration {
    pub type_name: &'static str,
    pub create: ServiceFactory,
}

impl ServiceRegistration {
    #[must_use]
    pub const fn new(type_name: &'static str, create: ServiceFactory) -> Self {
        Self { type_name, create }
    }
}

inventory::collect!(ServiceRegistration);

/// Finds the code registered for `type_name`, if any was linked.
#[must_use]
pub fn find_service(type_name: &str) -> Option<&'static ServiceRegistration> {
    inventory::iter::<ServiceRegistration>
        .into_iter()
        .find(|registration| registration.type_name == type_name)
}
