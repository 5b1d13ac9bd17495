//! Module domain: the resolution scope that owns loaded modules.
//!
//! A [`ModuleDomain`] keeps every module loaded into it, indexed by simple
//! name and remembered in load order. Loading a module by name consults the
//! loaded set first; on a miss, every attached [`ResolutionProvider`] is
//! asked in attachment order and the first module returned wins.
//!
//! Modules are loaded in one of two modes:
//! - [`LoadMode::MetadataOnly`] registers the declared types and resources.
//! - [`LoadMode::Full`] additionally links every concrete class to its
//!   registered code and loads every referenced module.
//!
//! A metadata-only module is upgraded in place when it is later loaded fully.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use parking_lot::RwLock;
use svchost_core::service::find_service;
use svchost_core::{ModuleManifest, ModuleReference, QualifiedTypeName, ServiceFactory, TypeDescriptor};
use tracing::{debug, warn};

use crate::error::{DomainError, ResolveError};

static CURRENT: LazyLock<Arc<ModuleDomain>> =
    LazyLock::new(|| Arc::new(ModuleDomain::new("process")));

/// How much of a module is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadMode {
    /// Type information and resources only; no code is linked.
    MetadataOnly,
    /// Types, resources, linked code, and referenced modules.
    Full,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MetadataOnly => f.write_str("metadata-only"),
            Self::Full => f.write_str("full"),
        }
    }
}

/// A module loaded into a domain.
#[derive(Debug)]
pub struct LoadedModule {
    manifest: ModuleManifest,
    path: PathBuf,
    mode: LoadMode,
    linked: HashMap<String, ServiceFactory>,
}

impl LoadedModule {
    fn new(manifest: ModuleManifest, path: &Path, mode: LoadMode) -> Self {
        let linked = if mode == LoadMode::Full {
            link_code(&manifest)
        } else {
            HashMap::new()
        };
        Self {
            manifest,
            path: path.to_path_buf(),
            mode,
            linked,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    #[must_use]
    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.manifest.types.iter()
    }

    #[must_use]
    pub fn find_type(&self, type_name: &str) -> Option<&TypeDescriptor> {
        self.manifest.find_type(type_name)
    }

    /// The code linked for a concrete class. Always `None` for
    /// metadata-only modules.
    #[must_use]
    pub fn factory_for(&self, type_name: &str) -> Option<ServiceFactory> {
        self.linked.get(type_name).copied()
    }

    /// The stable identity of a type declared by this module.
    #[must_use]
    pub fn qualify(&self, type_name: &str) -> QualifiedTypeName {
        QualifiedTypeName::new(type_name, Some(self.name()))
    }
}

fn link_code(manifest: &ModuleManifest) -> HashMap<String, ServiceFactory> {
    let mut linked = HashMap::new();
    for ty in manifest.types.iter().filter(|t| t.is_concrete_class()) {
        match find_service(&ty.name) {
            Some(registration) => {
                linked.insert(ty.name.clone(), registration.create);
            }
            None => debug!("No code linked for {} in {}", ty.name, manifest.name),
        }
    }
    linked
}

/// A type found in a domain, together with the module that declares it.
#[derive(Debug, Clone)]
pub struct ResolvedType {
    pub module: Arc<LoadedModule>,
    pub descriptor: TypeDescriptor,
}

impl ResolvedType {
    #[must_use]
    pub fn qualified_name(&self) -> QualifiedTypeName {
        self.module.qualify(&self.descriptor.name)
    }
}

/// A request for a module the domain has not loaded.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub reference: &'a ModuleReference,
    pub mode: LoadMode,
}

/// Supplies modules the domain cannot find among those already loaded.
///
/// Providers may be invoked reentrantly, including from inside another
/// provider's call to [`ModuleDomain::load_from`]. A miss returns `None`;
/// providers never fail.
pub trait ResolutionProvider: Send + Sync {
    fn resolve(&self, domain: &ModuleDomain, request: &ResolveRequest<'_>) -> Option<Arc<LoadedModule>>;
}

/// A scope of loaded modules with a chain of resolution providers.
pub struct ModuleDomain {
    name: String,
    modules: DashMap<String, Arc<LoadedModule>>,
    load_order: RwLock<Vec<String>>,
    providers: RwLock<Vec<Arc<dyn ResolutionProvider>>>,
}

impl ModuleDomain {
    /// Creates an empty domain with no resolution providers.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modules: DashMap::new(),
            load_order: RwLock::new(Vec::new()),
            providers: RwLock::new(Vec::new()),
        }
    }

    /// The process-wide domain.
    #[must_use]
    pub fn current() -> Arc<Self> {
        Arc::clone(&CURRENT)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a provider to the resolution chain.
    ///
    /// Returns `false` without changing anything if the same provider
    /// instance is already attached.
    pub fn attach(&self, provider: Arc<dyn ResolutionProvider>) -> bool {
        let mut providers = self.providers.write();
        if providers.iter().any(|p| same_provider(p, &provider)) {
            return false;
        }
        providers.push(provider);
        true
    }

    /// Removes a provider from the resolution chain.
    ///
    /// Returns `false` if the provider was not attached.
    pub fn detach(&self, provider: &Arc<dyn ResolutionProvider>) -> bool {
        let mut providers = self.providers.write();
        let before = providers.len();
        providers.retain(|p| !same_provider(p, provider));
        providers.len() != before
    }

    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.read().len()
    }

    /// Looks up a loaded module by simple name, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<LoadedModule>> {
        let key = ModuleReference::parse(name).key();
        self.modules.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    /// All loaded modules in load order.
    #[must_use]
    pub fn modules(&self) -> Vec<Arc<LoadedModule>> {
        self.load_order
            .read()
            .iter()
            .filter_map(|key| self.modules.get(key).map(|entry| Arc::clone(entry.value())))
            .collect()
    }

    /// Loads the module image at `path`.
    ///
    /// If a module with the same name is already loaded in at least the
    /// requested mode, that module is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Manifest`] if the image cannot be read, and
    /// [`DomainError::Reference`] if a full load cannot load one of the
    /// module's references. A module whose references fail is not kept.
    pub fn load_from(&self, path: &Path, mode: LoadMode) -> Result<Arc<LoadedModule>, DomainError> {
        let manifest = ModuleManifest::read(path)?;
        let key = ModuleReference::parse(&manifest.name).key();

        if let Some(existing) = self.modules.get(&key).map(|e| Arc::clone(e.value())) {
            if existing.mode() >= mode {
                return Ok(existing);
            }
        }

        let module = Arc::new(LoadedModule::new(manifest, path, mode));
        let previous = self.modules.insert(key.clone(), Arc::clone(&module));
        if previous.is_none() {
            self.load_order.write().push(key.clone());
        }

        if mode == LoadMode::Full {
            for reference in &module.manifest.references {
                if let Err(source) = self.load(reference, LoadMode::Full) {
                    self.restore(&key, previous);
                    return Err(DomainError::Reference {
                        module: module.name().to_string(),
                        reference: reference.clone(),
                        source: Box::new(source),
                    });
                }
            }
        }

        debug!("Loaded module {} ({}) from {}", module.name(), mode, path.display());
        Ok(module)
    }

    /// Loads a module by reference (`Name[, Version=...]`).
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ModuleNotFound`] if the module is not loaded
    /// and no provider supplies it.
    pub fn load(&self, reference: &str, mode: LoadMode) -> Result<Arc<LoadedModule>, DomainError> {
        let reference = ModuleReference::parse(reference);

        if let Some(existing) = self.get(reference.simple_name()) {
            if existing.mode() >= mode {
                return Ok(existing);
            }
            let path = existing.path().to_path_buf();
            return self.load_from(&path, mode);
        }

        // Snapshot the chain: providers load modules through this domain.
        let providers = self.providers.read().clone();
        let request = ResolveRequest {
            reference: &reference,
            mode,
        };
        for provider in providers {
            if let Some(module) = provider.resolve(self, &request) {
                return Ok(module);
            }
        }

        Err(DomainError::ModuleNotFound {
            name: reference.simple_name().to_string(),
        })
    }

    /// Finds a type by full name across loaded modules, in load order.
    #[must_use]
    pub fn find_type(&self, type_name: &str) -> Option<ResolvedType> {
        self.modules().into_iter().find_map(|module| {
            let descriptor = module.find_type(type_name)?.clone();
            Some(ResolvedType { module, descriptor })
        })
    }

    /// Resolves a possibly module-qualified type name.
    ///
    /// A qualified name loads its module by name first, which may invoke
    /// the resolution providers. An unqualified name is searched across the
    /// loaded modules.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Module`] if the named module cannot be loaded
    /// and [`ResolveError::TypeNotFound`] if no module declares the type.
    pub fn resolve_type(&self, qualified: &str) -> Result<ResolvedType, ResolveError> {
        let name = QualifiedTypeName::parse(qualified);
        let resolved = match name.module() {
            Some(module) => {
                let module = self
                    .load(module.simple_name(), LoadMode::MetadataOnly)
                    .map_err(|source| ResolveError::Module {
                        name: qualified.to_string(),
                        source,
                    })?;
                module.find_type(name.type_name()).cloned().map(|descriptor| ResolvedType {
                    module: Arc::clone(&module),
                    descriptor,
                })
            }
            None => self.find_type(name.type_name()),
        };
        resolved.ok_or_else(|| ResolveError::TypeNotFound {
            name: qualified.to_string(),
        })
    }

    /// Resolves a contract name like [`ModuleDomain::resolve_type`] and
    /// requires the type to be an interface.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NotAContract`] for a type that is not an
    /// interface, and any error of [`ModuleDomain::resolve_type`].
    pub fn resolve_contract(&self, qualified: &str) -> Result<ResolvedType, ResolveError> {
        let resolved = self.resolve_type(qualified)?;
        if !resolved.descriptor.is_interface() {
            return Err(ResolveError::NotAContract {
                name: resolved.qualified_name().to_string(),
            });
        }
        Ok(resolved)
    }

    fn restore(&self, key: &str, previous: Option<Arc<LoadedModule>>) {
        if let Some(previous) = previous {
            self.modules.insert(key.to_string(), previous);
        } else {
            self.modules.remove(key);
            self.load_order.write().retain(|k| k != key);
            warn!("Unloaded module {key} after a failed reference");
        }
    }
}

impl fmt::Debug for ModuleDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDomain")
            .field("name", &self.name)
            .field("modules", &self.modules.len())
            .field("providers", &self.provider_count())
            .finish()
    }
}

fn same_provider(a: &Arc<dyn ResolutionProvider>, b: &Arc<dyn ResolutionProvider>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
