//! Error types for module images and endpoint configuration.

use std::path::PathBuf;

/// Errors reading a module image from disk.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read module image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed module image {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors parsing an embedded endpoint configuration resource.
///
/// Both variants are fatal for the module being loaded.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unparsable endpoint configuration in resource {resource}: {source}")]
    Markup {
        resource: String,
        #[source]
        source: roxmltree::Error,
    },
    #[error("endpoint in resource {resource} is missing required attribute {attribute}")]
    MissingAttribute {
        resource: String,
        attribute: &'static str,
    },
}
