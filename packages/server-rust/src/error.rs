//! Error types for module loading, type resolution, listeners, and hosting.

use std::path::PathBuf;

use svchost_core::{CatalogError, ManifestError};

/// Errors loading a module into a [`ModuleDomain`](crate::domain::ModuleDomain).
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("module not found: {name}")]
    ModuleNotFound { name: String },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("module {module} references {reference}, which could not be loaded: {source}")]
    Reference {
        module: String,
        reference: String,
        #[source]
        source: Box<DomainError>,
    },
}

/// Errors resolving a type name to a declared type.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unable to load module for {name}: {source}")]
    Module {
        name: String,
        #[source]
        source: DomainError,
    },
    #[error("unable to get type for {name}")]
    TypeNotFound { name: String },
    #[error("{name} is not a contract")]
    NotAContract { name: String },
}

/// Errors configuring a listener.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("binding {binding} uses scheme {expected}, address {address} does not")]
    SchemeMismatch {
        binding: String,
        expected: &'static str,
        address: String,
    },
    #[error("endpoints cannot be added once the listener has been opened")]
    AlreadyOpened,
}

/// Errors constructing a hosting orchestrator.
///
/// Only failures in shared setup propagate; failures for a single endpoint
/// or listener are logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum HostingError {
    #[error("unable to enumerate modules in {folder}: {source}")]
    Enumerate {
        folder: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
