//! `svchost` core: endpoint descriptors, endpoint catalog, module images, and
//! service registrations.

pub mod catalog;
pub mod endpoint;
pub mod error;
pub mod manifest;
pub mod service;
pub mod type_name;

pub use catalog::EndpointCatalog;
pub use endpoint::EndpointDescriptor;
pub use error::{CatalogError, ManifestError};
pub use manifest::{EmbeddedResource, ModuleManifest, TypeDescriptor, TypeKind, MODULE_EXTENSION};
pub use service::{InvokeError, ServiceFactory, ServiceInstance, ServiceRegistration};
pub use type_name::{ModuleReference, QualifiedTypeName};

