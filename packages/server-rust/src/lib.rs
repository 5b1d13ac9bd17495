//! svchost server: resolves modules, binds configured endpoints to their
//! implementations, and runs one listener per hosted implementation.

pub mod binding;
pub mod cli;
pub mod domain;
pub mod error;
pub mod host;
pub mod hosting;
pub mod resolver;

#[cfg(test)]
mod testing;

pub use binding::{Binding, Transport};
pub use domain::{LoadMode, LoadedModule, ModuleDomain};
pub use error::{DomainError, HostError, HostingError, ResolveError};
pub use host::{Listener, ListenerFactory, ListenerObserver, ServiceHost};
pub use hosting::{BindOutcome, HostingOptions, HostingOrchestrator};
pub use resolver::ModuleResolver;
