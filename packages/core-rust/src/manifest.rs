//! Module images: the on-disk description of a loadable module.
//!
//! A module image is a JSON document stored in a file named
//! `<SimpleName>.`[`MODULE_EXTENSION`]. It declares the module's logical
//! name, the modules it references, the types it declares, and its embedded
//! resources.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// File extension of module images.
pub const MODULE_EXTENSION: &str = "module";

/// Kind of a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    /// A contract: a remotely invocable service surface.
    Interface,
    /// A class, possibly implementing contracts.
    Class,
}

/// A type declared by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Full type name (`Namespace.Type`).
    pub name: String,
    pub kind: TypeKind,
    /// Only meaningful for classes.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Base class of a class.
    #[serde(default)]
    pub base: Option<String>,
    /// Interfaces implemented by a class.
    #[serde(default)]
    pub implements: Vec<String>,
    /// Interfaces extended by an interface.
    #[serde(default)]
    pub extends: Vec<String>,
}

impl TypeDescriptor {
    /// A non-abstract class: the only kind of type that can be hosted.
    #[must_use]
    pub fn is_concrete_class(&self) -> bool {
        self.kind == TypeKind::Class && !self.is_abstract
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }
}

/// A named text resource embedded in a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    pub name: String,
    pub content: String,
}

/// The parsed content of a module image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Logical module name. Defaults to the image's file stem.
    #[serde(default)]
    pub name: String,
    /// Referenced modules, resolved when the module is fully loaded.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub types: Vec<TypeDescriptor>,
    #[serde(default)]
    pub resources: Vec<EmbeddedResource>,
}

impl ModuleManifest {
    /// Reads and parses a module image.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the file cannot be read and
    /// [`ManifestError::Parse`] if it is not a valid module image.
    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest: Self =
            serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if manifest.name.is_empty() {
            manifest.name = default_module_name(path);
        }
        Ok(manifest)
    }

    /// Looks up a declared type by full name.
    #[must_use]
    pub fn find_type(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Names of all embedded resources.
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(|r| r.name.as_str())
    }
}

/// File stem of a module image path (`dir/Acme.Services.module` -> `Acme.Services`).
fn default_module_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
