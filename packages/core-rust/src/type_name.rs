//! Parsing of qualified type names and module references.
//!
//! A qualified type name has the form `Type.Name[, Module.Name[, Key=Value...]]`.
//! A module reference has the form `Module.Name[, Key=Value...]`. Only the
//! simple module name takes part in resolution; the remaining key/value
//! pairs (version, culture, ...) are accepted and ignored.

use std::fmt;

/// A module reference reduced to its simple name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleReference {
    simple_name: String,
}

impl ModuleReference {
    /// Parses a module reference, discarding everything after the first comma.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        let simple_name = reference
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        Self { simple_name }
    }

    #[must_use]
    pub fn simple_name(&self) -> &str {
        &self.simple_name
    }

    /// Case-insensitive key used to index loaded modules.
    #[must_use]
    pub fn key(&self) -> String {
        self.simple_name.to_ascii_lowercase()
    }
}

impl fmt::Display for ModuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.simple_name)
    }
}

/// A type name, optionally qualified with the module that declares it.
///
/// The `Display` form (`Type.Name, Module`) is the stable identity used to
/// key hosts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedTypeName {
    type_name: String,
    module: Option<ModuleReference>,
}

impl QualifiedTypeName {
    #[must_use]
    pub fn new(type_name: impl Into<String>, module: Option<&str>) -> Self {
        Self {
            type_name: type_name.into(),
            module: module.map(ModuleReference::parse),
        }
    }

    /// Parses `Type.Name` or `Type.Name, Module[, ...]`.
    #[must_use]
    pub fn parse(qualified: &str) -> Self {
        match qualified.split_once(',') {
            Some((type_name, module)) => {
                let module = ModuleReference::parse(module);
                Self {
                    type_name: type_name.trim().to_string(),
                    module: (!module.simple_name().is_empty()).then_some(module),
                }
            }
            None => Self {
                type_name: qualified.trim().to_string(),
                module: None,
            },
        }
    }

    /// The full type name without module qualification.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The last dotted segment of the type name.
    #[must_use]
    pub fn simple_type_name(&self) -> &str {
        simple_type_name(&self.type_name)
    }

    #[must_use]
    pub fn module(&self) -> Option<&ModuleReference> {
        self.module.as_ref()
    }
}

impl fmt::Display for QualifiedTypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "{}, {}", self.type_name, module),
            None => f.write_str(&self.type_name),
        }
    }
}

/// Returns the last dotted segment of a type name (`A.B.Foo` -> `Foo`).
#[must_use]
pub fn simple_type_name(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}
